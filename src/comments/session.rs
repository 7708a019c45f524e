#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::comments::model::{Comment, NewComment, Vote};
use crate::comments::thread::CommentThread;
use crate::comments::transactor::{CommentTransactor, ReactionOutcome, VoteOutcome};
use crate::config::SyncConfig;
use crate::error::{Result, StoreError};
use crate::store::{
    COMMENTS, Direction, Filter, Query, QuerySnapshot, RemoteStore, Subscription, WriteReceipt,
    decode_all,
};
use crate::task::{DisplayUser, UserDirectory, UserInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentEvent {
    TopLevel { version: u64 },
    Replies { version: u64 },
    Notice(String),
}

pub struct CommentSession {
    store: Arc<dyn RemoteStore>,
    transactor: CommentTransactor,
    task_id: String,
    page_size: usize,
    top_sub: Option<Subscription<QuerySnapshot>>,
    replies_sub: Option<Subscription<QuerySnapshot>>,
    live_top: Vec<Comment>,
    replies: Vec<Comment>,
    older: BTreeMap<String, Comment>,
    thread: CommentThread,
    authors: UserDirectory,
    has_more: bool,
    outage: bool,
}

impl CommentSession {
    pub fn open(store: Arc<dyn RemoteStore>, cfg: &SyncConfig, task_id: &str) -> Result<Self> {
        cfg.validate()?;
        let page_size = cfg.comments.page_size;
        let top_sub = store.subscribe_query(top_level_query(task_id).limit(page_size))?;
        let replies_sub = store.subscribe_query(
            Query::collection(COMMENTS)
                .filter(Filter::eq("taskId", task_id))
                .order_by("createdAtMs", Direction::Asc),
        )?;
        debug!(%task_id, "comment session opened");
        Ok(Self {
            transactor: CommentTransactor::new(Arc::clone(&store), cfg),
            store,
            task_id: task_id.to_owned(),
            page_size,
            top_sub: Some(top_sub),
            replies_sub: Some(replies_sub),
            live_top: Vec::new(),
            replies: Vec::new(),
            older: BTreeMap::new(),
            thread: CommentThread::default(),
            authors: UserDirectory::new(),
            has_more: false,
            outage: false,
        })
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn thread(&self) -> &CommentThread {
        &self.thread
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn transactor(&self) -> &CommentTransactor {
        &self.transactor
    }

    pub async fn next_event(&mut self) -> Option<CommentEvent> {
        if self.is_closed() {
            return None;
        }
        tokio::select! {
            Some(res) = recv_opt(&mut self.top_sub) => Some(self.on_top_level(res)),
            Some(res) = recv_opt(&mut self.replies_sub) => Some(self.on_replies(res)),
            else => None,
        }
    }

    pub fn drain(&mut self) -> Vec<CommentEvent> {
        let mut events = Vec::new();
        while let Some(res) = self.top_sub.as_mut().and_then(Subscription::try_recv) {
            events.push(self.on_top_level(res));
        }
        while let Some(res) = self.replies_sub.as_mut().and_then(Subscription::try_recv) {
            events.push(self.on_replies(res));
        }
        events
    }

    fn on_top_level(&mut self, res: Result<QuerySnapshot, StoreError>) -> CommentEvent {
        let snapshot = match res {
            Ok(s) => s,
            Err(e) => return self.on_error(&e),
        };
        self.outage = false;
        let incoming: Vec<Comment> = decode_all(&snapshot);

        // A full page that no longer holds an older comment pushed it out rather than
        // deleting it; keep it as part of the static history.
        if incoming.len() >= self.page_size
            && let Some(newest_cutoff) = incoming.iter().map(|c| c.created_at_ms).min()
        {
            for c in self.live_top.drain(..) {
                if c.created_at_ms < newest_cutoff && !incoming.iter().any(|n| n.id == c.id) {
                    self.older.insert(c.id.clone(), c);
                }
            }
        }
        if self.older.is_empty() {
            self.has_more = incoming.len() >= self.page_size;
        }
        for c in &incoming {
            self.older.remove(&c.id);
        }
        self.live_top = incoming;
        self.rebuild();
        CommentEvent::TopLevel {
            version: snapshot.version,
        }
    }

    fn on_replies(&mut self, res: Result<QuerySnapshot, StoreError>) -> CommentEvent {
        let snapshot = match res {
            Ok(s) => s,
            Err(e) => return self.on_error(&e),
        };
        self.outage = false;
        self.replies = decode_all::<Comment>(&snapshot)
            .into_iter()
            .filter(Comment::is_reply)
            .collect();
        self.rebuild();
        CommentEvent::Replies {
            version: snapshot.version,
        }
    }

    fn on_error(&mut self, e: &StoreError) -> CommentEvent {
        if !self.outage {
            self.outage = true;
            warn!(task_id = %self.task_id, "comment subscription error: {e}");
        }
        CommentEvent::Notice(format!("Comments may be out of date: {e}"))
    }

    fn rebuild(&mut self) {
        for c in self.live_top.iter().chain(&self.replies).chain(self.older.values()) {
            let info = c.author_name.as_ref().map(|name| UserInfo {
                id: c.author_id.clone(),
                display_name: Some(name.clone()),
                email: None,
                photo_url: c.author_avatar.clone(),
            });
            self.authors.merge(&c.author_id, info);
        }
        self.thread = CommentThread::build(
            self.live_top
                .iter()
                .chain(self.older.values())
                .chain(&self.replies)
                .cloned(),
        );
    }

    #[must_use]
    pub fn author(&self, user_id: &str) -> DisplayUser {
        self.authors.display(user_id)
    }

    pub async fn fetch_more_top_level(&mut self) -> Result<usize> {
        let Some(cursor) = self.thread.oldest_top_level_ms() else {
            self.has_more = false;
            return Ok(0);
        };
        let page = self
            .store
            .query(
                &top_level_query(&self.task_id)
                    .start_after(cursor)
                    .limit(self.page_size),
            )
            .await?;
        let comments: Vec<Comment> = decode_all(&page);
        let fetched = comments.len();
        self.has_more = fetched >= self.page_size;
        for c in comments {
            self.older.insert(c.id.clone(), c);
        }
        self.rebuild();
        Ok(fetched)
    }

    pub async fn post(&mut self, author_id: &str, text: &str) -> Result<String> {
        self.transactor
            .create_comment(NewComment::new(&self.task_id, author_id, text))
            .await
    }

    pub async fn reply(&mut self, parent_id: &str, author_id: &str, text: &str) -> Result<String> {
        self.transactor
            .create_comment(NewComment::new(&self.task_id, author_id, text).reply_to(parent_id))
            .await
    }

    pub async fn edit(&mut self, comment_id: &str, text: &str) -> Result<WriteReceipt> {
        let receipt = self.transactor.update_comment(comment_id, text).await?;
        self.refresh_static(comment_id).await;
        Ok(receipt)
    }

    pub async fn delete(&mut self, comment_id: &str) -> Result<()> {
        self.transactor.delete_comment(comment_id).await?;
        if self.older.remove(comment_id).is_some() {
            self.rebuild();
        }
        Ok(())
    }

    pub async fn toggle_vote(
        &mut self,
        comment_id: &str,
        user_id: &str,
        direction: Vote,
    ) -> Result<VoteOutcome> {
        let outcome = self
            .transactor
            .toggle_vote(comment_id, user_id, direction)
            .await?;
        self.refresh_static(comment_id).await;
        Ok(outcome)
    }

    pub async fn toggle_reaction(
        &mut self,
        comment_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome> {
        let outcome = self
            .transactor
            .toggle_reaction(comment_id, user_id, emoji)
            .await?;
        self.refresh_static(comment_id).await;
        Ok(outcome)
    }

    async fn refresh_static(&mut self, comment_id: &str) {
        if !self.older.contains_key(comment_id) {
            return;
        }
        match self.transactor.get_comment(comment_id).await {
            Ok(Some(c)) => {
                self.older.insert(c.id.clone(), c);
            }
            Ok(None) => {
                self.older.remove(comment_id);
            }
            Err(e) => debug!(%comment_id, "refresh of paged comment failed: {e}"),
        }
        self.rebuild();
    }

    pub fn close(&mut self) {
        if let Some(mut sub) = self.top_sub.take() {
            sub.cancel();
        }
        if let Some(mut sub) = self.replies_sub.take() {
            sub.cancel();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.top_sub.is_none() && self.replies_sub.is_none()
    }
}

impl Drop for CommentSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn top_level_query(task_id: &str) -> Query {
    Query::collection(COMMENTS)
        .filter(Filter::eq("taskId", task_id))
        .filter(Filter::Eq("parentId".to_owned(), serde_json::Value::Null))
        .order_by("createdAtMs", Direction::Desc)
}

async fn recv_opt<E>(sub: &mut Option<Subscription<E>>) -> Option<Result<E, StoreError>> {
    match sub {
        Some(s) => s.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn open(store: &InMemoryStore, page_size: usize) -> CommentSession {
        let mut cfg = SyncConfig::default();
        cfg.comments.page_size = page_size;
        let shared: Arc<dyn RemoteStore> = Arc::new(store.clone());
        CommentSession::open(shared, &cfg, "t1").unwrap()
    }

    #[tokio::test]
    async fn live_thread_nests_replies() {
        let store = InMemoryStore::new();
        let mut s = open(&store, 10);
        let root = s.post("u1", "first").await.unwrap();
        let reply = s.reply(&root, "u2", "answer").await.unwrap();
        s.drain();
        assert_eq!(s.thread().top_level().len(), 1);
        assert_eq!(s.thread().replies_to(&root)[0].id, reply);
        assert_eq!(s.thread().top_level()[0].reply_badge(), 1);
    }

    async fn seed_comments(store: &InMemoryStore, n: usize) -> Vec<String> {
        let shared: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let t = CommentTransactor::new(shared, &SyncConfig::default());
        let mut ids = Vec::new();
        for i in 0..n {
            ids.push(
                t.create_comment(NewComment::new("t1", "u1", &format!("c{i}")))
                    .await
                    .unwrap(),
            );
        }
        ids
    }

    #[tokio::test]
    async fn paging_walks_back_through_history() {
        let store = InMemoryStore::new();
        let ids = seed_comments(&store, 5).await;
        let mut s = open(&store, 2);
        s.drain();
        let shown: Vec<&str> = s.thread().top_level().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(shown, vec![ids[4].as_str(), ids[3].as_str()]);
        assert!(s.has_more());

        assert_eq!(s.fetch_more_top_level().await.unwrap(), 2);
        assert_eq!(s.fetch_more_top_level().await.unwrap(), 1);
        assert!(!s.has_more());
        let shown: Vec<&str> = s.thread().top_level().iter().map(|c| c.id.as_str()).collect();
        let expected: Vec<&str> = ids.iter().rev().map(String::as_str).collect();
        assert_eq!(shown, expected);
    }

    #[tokio::test]
    async fn comment_pushed_off_the_live_page_stays_visible() {
        let store = InMemoryStore::new();
        let mut s = open(&store, 1);
        let first = s.post("u1", "first").await.unwrap();
        s.drain();
        let second = s.post("u1", "second").await.unwrap();
        s.drain();
        let shown: Vec<&str> = s.thread().top_level().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(shown, vec![second.as_str(), first.as_str()]);
    }

    #[tokio::test]
    async fn votes_on_paged_comments_are_refreshed() {
        let store = InMemoryStore::new();
        let ids = seed_comments(&store, 2).await;
        let mut s = open(&store, 1);
        s.drain();
        assert_eq!(s.fetch_more_top_level().await.unwrap(), 1);
        s.toggle_vote(&ids[0], "u2", Vote::Like).await.unwrap();
        assert_eq!(s.thread().get(&ids[0]).unwrap().like_count, 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = InMemoryStore::new();
        let mut s = open(&store, 10);
        s.close();
        s.close();
        assert!(s.next_event().await.is_none());
        assert_eq!(store.active_subscriptions(), 0);
    }
}
