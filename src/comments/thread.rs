#![forbid(unsafe_code)]

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::comments::model::Comment;

#[derive(Debug, Clone, Default)]
pub struct CommentThread {
    top_level: Vec<Comment>,
    replies: HashMap<String, Vec<Comment>>,
}

impl CommentThread {
    #[must_use]
    pub fn build(comments: impl IntoIterator<Item = Comment>) -> Self {
        let mut top_level = Vec::new();
        let mut replies: HashMap<String, Vec<Comment>> = HashMap::new();
        for c in comments {
            match c.parent_id.clone() {
                Some(parent) => replies.entry(parent).or_default().push(c),
                None => top_level.push(c),
            }
        }
        top_level.sort_by(|a, b| {
            Reverse(a.created_at_ms)
                .cmp(&Reverse(b.created_at_ms))
                .then_with(|| a.id.cmp(&b.id))
        });
        for list in replies.values_mut() {
            list.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        }
        Self { top_level, replies }
    }

    #[must_use]
    pub fn top_level(&self) -> &[Comment] {
        &self.top_level
    }

    #[must_use]
    pub fn replies_to(&self, comment_id: &str) -> &[Comment] {
        self.replies
            .get(comment_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn oldest_top_level_ms(&self) -> Option<i64> {
        self.top_level.last().map(|c| c.created_at_ms)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.top_level.len() + self.replies.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, comment_id: &str) -> Option<&Comment> {
        self.top_level
            .iter()
            .chain(self.replies.values().flatten())
            .find(|c| c.id == comment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, ms: i64, parent: Option<&str>) -> Comment {
        serde_json::from_value(json!({
            "id": id, "taskId": "t", "authorId": "u", "text": id,
            "createdAtMs": ms, "parentId": parent,
        }))
        .unwrap()
    }

    #[test]
    fn orders_top_level_desc_and_replies_asc() {
        let thread = CommentThread::build(vec![
            comment("a", 1, None),
            comment("r2", 5, Some("a")),
            comment("b", 3, None),
            comment("r1", 4, Some("a")),
        ]);
        let top: Vec<&str> = thread.top_level().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(top, vec!["b", "a"]);
        let replies: Vec<&str> = thread.replies_to("a").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(replies, vec!["r1", "r2"]);
        assert_eq!(thread.oldest_top_level_ms(), Some(1));
        assert_eq!(thread.len(), 4);
        assert!(thread.get("r2").is_some());
    }
}
