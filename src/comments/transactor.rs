#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::comments::model::{Comment, NewComment, Vote};
use crate::config::SyncConfig;
use crate::error::{Result, StoreError, TaskweaveError};
use crate::store::{COMMENTS, DocPath, Patch, RemoteStore, StoredDoc, TxHandle, WriteReceipt, transact};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Added(Vote),
    Retracted(Vote),
    Switched { from: Vote, to: Vote },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionOutcome {
    pub added: bool,
    pub count: i64,
}

pub struct CommentTransactor {
    store: Arc<dyn RemoteStore>,
    max_attempts: u32,
    last_ms: AtomicI64,
}

impl CommentTransactor {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, cfg: &SyncConfig) -> Self {
        Self {
            store,
            max_attempts: cfg.transactions.max_attempts,
            last_ms: AtomicI64::new(0),
        }
    }

    /// Client clock in epoch milliseconds, strictly increasing per transactor.
    fn next_ms(&self) -> i64 {
        let now = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
            .unwrap_or(i64::MAX);
        let prev = self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(prev.saturating_add(1))
    }

    pub async fn create_comment(&self, new: NewComment) -> Result<String> {
        let text = new.text.trim();
        if text.is_empty() {
            return Err(TaskweaveError::EmptyComment);
        }
        if let Some(parent_id) = &new.parent_id
            && self.store.get(&DocPath::comment(parent_id)).await?.is_none()
        {
            return Err(TaskweaveError::CommentNotFound(parent_id.clone()));
        }

        let ms = self.next_ms();
        let opt = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);
        let fields = Patch::new()
            .set("taskId", new.task_id.clone())
            .set("parentId", opt(&new.parent_id))
            .set("authorId", new.author_id.clone())
            .set("authorName", opt(&new.author_name))
            .set("authorAvatar", opt(&new.author_avatar))
            .set("text", text)
            .server_timestamp("createdAt")
            .server_timestamp("updatedAt")
            .set("createdAtMs", ms)
            .set("updatedAtMs", ms)
            .set("likeCount", 0)
            .set("dislikeCount", 0)
            .set("replyCount", 0)
            .set("reactionCounts", Value::Object(serde_json::Map::new()))
            .set("reactionUsers", Value::Object(serde_json::Map::new()))
            .set("voters", Value::Object(serde_json::Map::new()));
        let (id, _) = self.store.create(COMMENTS, fields).await?;
        info!(comment_id = %id, task_id = %new.task_id, "comment created");

        if let Some(parent_id) = &new.parent_id {
            self.bump_reply_count(parent_id, 1).await;
        }
        Ok(id)
    }

    pub async fn update_comment(&self, comment_id: &str, text: &str) -> Result<WriteReceipt> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskweaveError::EmptyComment);
        }
        let patch = Patch::new()
            .set("text", text)
            .server_timestamp("updatedAt")
            .set("updatedAtMs", self.next_ms());
        self.store
            .update(&DocPath::comment(comment_id), patch)
            .await
            .map_err(|e| not_found_as_comment(e, comment_id))
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let path = DocPath::comment(comment_id);
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| TaskweaveError::CommentNotFound(comment_id.to_owned()))?;
        let parent_id = doc
            .get("parentId")
            .and_then(Value::as_str)
            .map(str::to_owned);
        self.store.delete(&path).await?;
        debug!(%comment_id, "comment deleted");
        if let Some(parent_id) = parent_id {
            self.bump_reply_count(&parent_id, -1).await;
        }
        Ok(())
    }

    async fn bump_reply_count(&self, parent_id: &str, by: i64) {
        let patch = Patch::new()
            .increment("replyCount", by)
            .server_timestamp("updatedAt");
        match self.store.update(&DocPath::comment(parent_id), patch).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(%parent_id, "parent comment gone, reply count not adjusted");
            }
            Err(e) => warn!(%parent_id, "failed to adjust reply count: {e}"),
        }
    }

    pub async fn toggle_vote(
        &self,
        comment_id: &str,
        user_id: &str,
        direction: Vote,
    ) -> Result<VoteOutcome> {
        let path = DocPath::comment(comment_id);
        let (outcome, _) = transact(self.store.as_ref(), self.max_attempts, |tx| {
            let comment = read_comment(tx, &path)?;
            let mut voters = comment.voters.clone();
            let mut like = comment.like_count;
            let mut dislike = comment.dislike_count;
            let mut adjust = |vote: Vote, by: i64| match vote {
                Vote::Like => like = (like + by).max(0),
                Vote::Dislike => dislike = (dislike + by).max(0),
            };

            let outcome = match voters.get(user_id).copied() {
                None => {
                    adjust(direction, 1);
                    voters.insert(user_id.to_owned(), direction);
                    VoteOutcome::Added(direction)
                }
                Some(existing) if existing == direction => {
                    adjust(direction, -1);
                    voters.remove(user_id);
                    VoteOutcome::Retracted(direction)
                }
                Some(existing) => {
                    adjust(existing, -1);
                    adjust(direction, 1);
                    voters.insert(user_id.to_owned(), direction);
                    VoteOutcome::Switched {
                        from: existing,
                        to: direction,
                    }
                }
            };

            tx.update(
                &path,
                Patch::new()
                    .set_json("voters", &voters)
                    .set("likeCount", like)
                    .set("dislikeCount", dislike)
                    .server_timestamp("updatedAt"),
            );
            Ok(outcome)
        })
        .await
        .map_err(|e| not_found_as_comment(e, comment_id))?;
        debug!(%comment_id, %user_id, ?outcome, "vote toggled");
        Ok(outcome)
    }

    pub async fn toggle_reaction(
        &self,
        comment_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome> {
        if emoji.trim().is_empty() {
            return Err(StoreError::InvalidArgument("emoji must not be empty".to_owned()).into());
        }
        let path = DocPath::comment(comment_id);
        let (outcome, _) = transact(self.store.as_ref(), self.max_attempts, |tx| {
            let comment = read_comment(tx, &path)?;
            let mut users_by_emoji = comment.reaction_users.clone();
            let mut counts = comment.reaction_counts.clone();

            let users = users_by_emoji.entry(emoji.to_owned()).or_default();
            users.retain(|_, reacted| *reacted);
            let added = users.remove(user_id).is_none();
            if added {
                users.insert(user_id.to_owned(), true);
            }
            let count = i64::try_from(users.len()).unwrap_or(i64::MAX);
            if count == 0 {
                users_by_emoji.remove(emoji);
                counts.remove(emoji);
            } else {
                counts.insert(emoji.to_owned(), count);
            }

            tx.update(
                &path,
                Patch::new()
                    .set_json("reactionUsers", &users_by_emoji)
                    .set_json("reactionCounts", &counts)
                    .server_timestamp("updatedAt"),
            );
            Ok(ReactionOutcome { added, count })
        })
        .await
        .map_err(|e| not_found_as_comment(e, comment_id))?;
        Ok(outcome)
    }

    pub async fn get_comment(&self, comment_id: &str) -> Result<Option<Comment>> {
        let Some(data) = self.store.get(&DocPath::comment(comment_id)).await? else {
            return Ok(None);
        };
        let doc = StoredDoc {
            id: comment_id.to_owned(),
            data,
        };
        Ok(Some(doc.decode(COMMENTS)?))
    }
}

fn read_comment(tx: &mut dyn TxHandle, path: &DocPath) -> Result<Comment, StoreError> {
    let data = tx
        .get(path)?
        .ok_or_else(|| StoreError::NotFound(path.clone()))?;
    StoredDoc {
        id: path.id.clone(),
        data,
    }
    .decode(COMMENTS)
}

fn not_found_as_comment(e: StoreError, comment_id: &str) -> TaskweaveError {
    match e {
        StoreError::NotFound(_) => TaskweaveError::CommentNotFound(comment_id.to_owned()),
        other => other.into(),
    }
}

#[must_use]
pub fn recount_reactions(comment: &Comment) -> BTreeMap<String, i64> {
    comment
        .reaction_users
        .iter()
        .map(|(emoji, users)| {
            let n = users.values().filter(|r| **r).count();
            (emoji.clone(), i64::try_from(n).unwrap_or(i64::MAX))
        })
        .filter(|(_, n)| *n > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn setup() -> (InMemoryStore, CommentTransactor) {
        let store = InMemoryStore::new();
        let shared: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let tx = CommentTransactor::new(shared, &SyncConfig::default());
        (store, tx)
    }

    #[tokio::test]
    async fn reply_bumps_and_delete_decrements_parent_count() {
        let (_store, t) = setup();
        let parent = t.create_comment(NewComment::new("t1", "u1", "hello")).await.unwrap();
        let reply = t
            .create_comment(NewComment::new("t1", "u2", "hi back").reply_to(&parent))
            .await
            .unwrap();
        assert_eq!(t.get_comment(&parent).await.unwrap().unwrap().reply_count, 1);

        t.delete_comment(&reply).await.unwrap();
        assert_eq!(t.get_comment(&parent).await.unwrap().unwrap().reply_count, 0);
        assert!(t.get_comment(&reply).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_text_and_missing_parent_are_rejected() {
        let (store, t) = setup();
        assert!(matches!(
            t.create_comment(NewComment::new("t1", "u1", "  ")).await,
            Err(TaskweaveError::EmptyComment)
        ));
        assert!(matches!(
            t.create_comment(NewComment::new("t1", "u1", "x").reply_to("nope")).await,
            Err(TaskweaveError::CommentNotFound(_))
        ));
        assert!(store.is_empty(COMMENTS));
    }

    #[tokio::test]
    async fn update_edits_text_and_reports_missing() {
        let (_store, t) = setup();
        let id = t.create_comment(NewComment::new("t1", "u1", "draft")).await.unwrap();
        t.update_comment(&id, "final").await.unwrap();
        let c = t.get_comment(&id).await.unwrap().unwrap();
        assert_eq!(c.text, "final");
        assert!(c.updated_at_ms.unwrap_or(0) > c.created_at_ms);
        assert!(matches!(
            t.update_comment("ghost", "x").await,
            Err(TaskweaveError::CommentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn vote_switch_moves_between_counters() {
        let (_store, t) = setup();
        let id = t.create_comment(NewComment::new("t1", "u1", "x")).await.unwrap();
        assert_eq!(
            t.toggle_vote(&id, "u1", Vote::Like).await.unwrap(),
            VoteOutcome::Added(Vote::Like)
        );
        assert_eq!(
            t.toggle_vote(&id, "u1", Vote::Dislike).await.unwrap(),
            VoteOutcome::Switched {
                from: Vote::Like,
                to: Vote::Dislike
            }
        );
        let c = t.get_comment(&id).await.unwrap().unwrap();
        assert_eq!((c.like_count, c.dislike_count), (0, 1));
        assert_eq!(c.vote_of("u1"), Some(Vote::Dislike));
    }

    #[tokio::test]
    async fn vote_on_missing_comment_is_comment_not_found() {
        let (_store, t) = setup();
        assert!(matches!(
            t.toggle_vote("ghost", "u1", Vote::Like).await,
            Err(TaskweaveError::CommentNotFound(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn reaction_toggle_removes_empty_entries() {
        let (_store, t) = setup();
        let id = t.create_comment(NewComment::new("t1", "u1", "x")).await.unwrap();
        let on = t.toggle_reaction(&id, "u1", "🔥").await.unwrap();
        assert_eq!(on, ReactionOutcome { added: true, count: 1 });
        let off = t.toggle_reaction(&id, "u1", "🔥").await.unwrap();
        assert_eq!(off, ReactionOutcome { added: false, count: 0 });
        let c = t.get_comment(&id).await.unwrap().unwrap();
        assert!(c.reaction_counts.is_empty());
        assert!(c.reaction_users.is_empty());
        assert!(t.toggle_reaction(&id, "u1", " ").await.is_err());
    }
}
