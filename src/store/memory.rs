#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{
    DocPath, DocSnapshot, Document, Patch, Query, QuerySnapshot, RemoteStore, Subscription,
    TxBody, TxHandle, WriteReceipt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Get,
    Query,
    Create,
    Set,
    Update,
    Delete,
    Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: OpKind,
    pub path: DocPath,
    pub version: u64,
}

#[derive(Debug)]
struct Fault {
    op: OpKind,
    path: Option<DocPath>,
    error: StoreError,
}

struct QuerySub {
    query: Query,
    tx: mpsc::UnboundedSender<Result<QuerySnapshot, StoreError>>,
}

struct DocSub {
    path: DocPath,
    tx: mpsc::UnboundedSender<Result<DocSnapshot, StoreError>>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    doc_versions: HashMap<DocPath, u64>,
    version: u64,
    next_sub_id: u64,
    query_subs: HashMap<u64, QuerySub>,
    doc_subs: HashMap<u64, DocSub>,
    faults: Vec<Fault>,
    interference: VecDeque<(DocPath, Patch)>,
    writes: Vec<WriteRecord>,
}

impl Inner {
    fn doc(&self, path: &DocPath) -> Option<&Document> {
        self.collections.get(&path.collection)?.get(&path.id)
    }

    fn doc_version(&self, path: &DocPath) -> u64 {
        self.doc_versions.get(path).copied().unwrap_or(0)
    }

    fn take_fault(&mut self, op: OpKind, path: Option<&DocPath>) -> Option<StoreError> {
        let idx = self.faults.iter().position(|f| {
            f.op == op && f.path.as_ref().is_none_or(|p| Some(p) == path)
        })?;
        Some(self.faults.remove(idx).error)
    }

    fn query_snapshot(&self, query: &Query) -> QuerySnapshot {
        let docs = match self.collections.get(&query.collection) {
            Some(coll) => query.select(coll.iter()),
            None => Vec::new(),
        };
        QuerySnapshot {
            collection: query.collection.clone(),
            version: self.version,
            docs,
        }
    }

    fn doc_snapshot(&self, path: &DocPath) -> DocSnapshot {
        DocSnapshot {
            path: path.clone(),
            version: self.version,
            data: self.doc(path).cloned(),
        }
    }

    fn commit(&mut self, op: OpKind, changes: Vec<(DocPath, Option<Document>)>) -> WriteReceipt {
        self.version += 1;
        let version = self.version;
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for (path, data) in &changes {
            let coll = self.collections.entry(path.collection.clone()).or_default();
            match data {
                Some(d) => {
                    coll.insert(path.id.clone(), d.clone());
                }
                None => {
                    coll.remove(&path.id);
                }
            }
            self.doc_versions.insert(path.clone(), version);
            touched.insert(path.collection.clone());
            self.writes.push(WriteRecord {
                op,
                path: path.clone(),
                version,
            });
        }
        self.notify(&touched, &changes);
        WriteReceipt { version }
    }

    fn notify(&mut self, collections: &BTreeSet<String>, changes: &[(DocPath, Option<Document>)]) {
        let mut dead = Vec::new();
        for (id, sub) in &self.query_subs {
            if !collections.contains(&sub.query.collection) {
                continue;
            }
            if sub.tx.send(Ok(self.query_snapshot(&sub.query))).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.query_subs.remove(&id);
        }

        let mut dead = Vec::new();
        for (id, sub) in &self.doc_subs {
            if !changes.iter().any(|(p, _)| p == &sub.path) {
                continue;
            }
            if sub.tx.send(Ok(self.doc_snapshot(&sub.path))).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.doc_subs.remove(&id);
        }
    }

    fn apply_update(&self, path: &DocPath, patch: &Patch) -> Result<Document, StoreError> {
        let mut doc = self
            .doc(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        patch.apply_to(&mut doc, OffsetDateTime::now_utc())?;
        Ok(doc)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        lock_inner(&self.inner)
    }

    /// Make the next matching operation fail with `error`. `path: None` matches any path.
    pub fn fail_next(&self, op: OpKind, path: Option<DocPath>, error: StoreError) {
        if let Ok(mut inner) = self.lock() {
            inner.faults.push(Fault { op, path, error });
        }
    }

    pub fn interfere_before_commit(&self, path: DocPath, patch: Patch) {
        if let Ok(mut inner) = self.lock() {
            inner.interference.push_back((path, patch));
        }
    }

    pub fn fail_subscriptions(&self, collection: &str, error: StoreError) {
        if let Ok(inner) = self.lock() {
            for sub in inner.query_subs.values() {
                if sub.query.collection == collection {
                    let _ = sub.tx.send(Err(error.clone()));
                }
            }
        }
    }

    pub fn snapshot_query(&self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        Ok(self.lock()?.query_snapshot(query))
    }

    pub fn seed(&self, path: &DocPath, data: Document) -> Result<WriteReceipt, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.commit(OpKind::Set, vec![(path.clone(), Some(data))]))
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().map(|i| i.writes.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|i| i.collections.get(collection).map(BTreeMap::len))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.lock()
            .map(|i| i.query_subs.len() + i.doc_subs.len())
            .unwrap_or(0)
    }

    fn next_sub_id(inner: &mut Inner) -> u64 {
        inner.next_sub_id += 1;
        inner.next_sub_id
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> Result<MutexGuard<'_, Inner>, StoreError> {
    inner
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_owned()))
}

enum TxWrite {
    Update(Patch),
    Set(Patch),
}

struct MemoryTx {
    inner: Arc<Mutex<Inner>>,
    reads: Vec<(DocPath, u64)>,
    writes: Vec<(DocPath, TxWrite)>,
}

impl TxHandle for MemoryTx {
    fn get(&mut self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let inner = lock_inner(&self.inner)?;
        let version = inner.doc_version(path);
        if !self.reads.iter().any(|(p, _)| p == path) {
            self.reads.push((path.clone(), version));
        }
        Ok(inner.doc(path).cloned())
    }

    fn update(&mut self, path: &DocPath, patch: Patch) {
        self.writes.push((path.clone(), TxWrite::Update(patch)));
    }

    fn set(&mut self, path: &DocPath, fields: Patch) {
        self.writes.push((path.clone(), TxWrite::Set(fields)));
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Get, Some(path)) {
            return Err(e);
        }
        Ok(inner.doc(path).cloned())
    }

    async fn query(&self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Query, None) {
            return Err(e);
        }
        Ok(inner.query_snapshot(query))
    }

    async fn create(
        &self,
        collection: &str,
        fields: Patch,
    ) -> Result<(String, WriteReceipt), StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Create, None) {
            return Err(e);
        }
        let id = Uuid::new_v4().simple().to_string();
        let path = DocPath::new(collection, &id);
        let mut doc = Document::new();
        fields.apply_to(&mut doc, OffsetDateTime::now_utc())?;
        let receipt = inner.commit(OpKind::Create, vec![(path, Some(doc))]);
        Ok((id, receipt))
    }

    async fn set(&self, path: &DocPath, fields: Patch) -> Result<WriteReceipt, StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Set, Some(path)) {
            return Err(e);
        }
        let mut doc = Document::new();
        fields.apply_to(&mut doc, OffsetDateTime::now_utc())?;
        Ok(inner.commit(OpKind::Set, vec![(path.clone(), Some(doc))]))
    }

    async fn update(&self, path: &DocPath, patch: Patch) -> Result<WriteReceipt, StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Update, Some(path)) {
            return Err(e);
        }
        let doc = inner.apply_update(path, &patch)?;
        Ok(inner.commit(OpKind::Update, vec![(path.clone(), Some(doc))]))
    }

    async fn delete(&self, path: &DocPath) -> Result<WriteReceipt, StoreError> {
        let mut inner = self.lock()?;
        if let Some(e) = inner.take_fault(OpKind::Delete, Some(path)) {
            return Err(e);
        }
        Ok(inner.commit(OpKind::Delete, vec![(path.clone(), None)]))
    }

    async fn run_transaction(
        &self,
        body: &mut TxBody<'_>,
        max_attempts: u32,
    ) -> Result<WriteReceipt, StoreError> {
        {
            let mut inner = self.lock()?;
            if let Some(e) = inner.take_fault(OpKind::Transaction, None) {
                return Err(e);
            }
        }

        for attempt in 1..=max_attempts.max(1) {
            let mut tx = MemoryTx {
                inner: Arc::clone(&self.inner),
                reads: Vec::new(),
                writes: Vec::new(),
            };
            body(&mut tx as &mut dyn TxHandle)?;

            {
                let mut inner = self.lock()?;
                if let Some((path, patch)) = inner.interference.pop_front() {
                    let doc = inner.apply_update(&path, &patch)?;
                    inner.commit(OpKind::Update, vec![(path, Some(doc))]);
                }

                let stale = tx
                    .reads
                    .iter()
                    .any(|(path, seen)| inner.doc_version(path) != *seen);
                if !stale {
                    let mut staged: Vec<(DocPath, Option<Document>)> = Vec::new();
                    for (path, write) in &tx.writes {
                        let base = match staged.iter().rposition(|(p, _)| p == path) {
                            Some(i) => staged.remove(i).1,
                            None => inner.doc(path).cloned(),
                        };
                        let (mut doc, patch) = match write {
                            TxWrite::Set(fields) => (Document::new(), fields),
                            TxWrite::Update(patch) => (
                                base.ok_or_else(|| StoreError::NotFound(path.clone()))?,
                                patch,
                            ),
                        };
                        patch.apply_to(&mut doc, OffsetDateTime::now_utc())?;
                        staged.push((path.clone(), Some(doc)));
                    }
                    if staged.is_empty() {
                        return Ok(WriteReceipt {
                            version: inner.version,
                        });
                    }
                    return Ok(inner.commit(OpKind::Transaction, staged));
                }
            }
            debug!(attempt, "transaction read set changed, retrying");
            tokio::task::yield_now().await;
        }
        Err(StoreError::Aborted {
            attempts: max_attempts.max(1),
        })
    }

    fn subscribe_doc(&self, path: &DocPath) -> Result<Subscription<DocSnapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        let id = Self::next_sub_id(&mut inner);
        let _ = tx.send(Ok(inner.doc_snapshot(path)));
        inner.doc_subs.insert(
            id,
            DocSub {
                path: path.clone(),
                tx,
            },
        );
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade()
                && let Ok(mut inner) = lock_inner(&inner)
            {
                inner.doc_subs.remove(&id);
            }
        }))
    }

    fn subscribe_query(&self, query: Query) -> Result<Subscription<QuerySnapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        let id = Self::next_sub_id(&mut inner);
        let _ = tx.send(Ok(inner.query_snapshot(&query)));
        inner.query_subs.insert(id, QuerySub { query, tx });
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade()
                && let Ok(mut inner) = lock_inner(&inner)
            {
                inner.query_subs.remove(&id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, transact};
    use serde_json::json;

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .update(&DocPath::task("nope"), Patch::new().set("name", "x"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(DocPath::task("nope")));
    }

    #[tokio::test]
    async fn subscription_receives_initial_and_subsequent_snapshots() {
        let store = InMemoryStore::new();
        let mut sub = store
            .subscribe_query(Query::collection("tasks").filter(Filter::eq("projectId", "p")))
            .unwrap();
        let first = sub.recv().await.unwrap().unwrap();
        assert!(first.docs.is_empty());

        let (id, receipt) = store
            .create("tasks", Patch::new().set("projectId", "p").set("name", "a"))
            .await
            .unwrap();
        let second = sub.recv().await.unwrap().unwrap();
        assert!(second.contains(&id));
        assert_eq!(second.version, receipt.version);

        sub.cancel();
        sub.cancel();
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn transaction_retries_after_interference() {
        let store = InMemoryStore::new();
        let path = DocPath::comment("c");
        store
            .seed(&path, json!({ "likeCount": 0 }).as_object().cloned().unwrap())
            .unwrap();
        store.interfere_before_commit(path.clone(), Patch::new().increment("likeCount", 1));

        let mut runs = 0;
        let (seen, _) = transact(&store, 5, |tx| {
            runs += 1;
            let doc = tx.get(&path)?.ok_or_else(|| StoreError::NotFound(path.clone()))?;
            let n = doc["likeCount"].as_i64().unwrap_or(0);
            tx.update(&path, Patch::new().set("likeCount", n + 1));
            Ok(n)
        })
        .await
        .unwrap();

        assert_eq!(runs, 2);
        assert_eq!(seen, 1);
        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc["likeCount"], json!(2));
    }

    #[tokio::test]
    async fn transaction_gives_up_after_max_attempts() {
        let store = InMemoryStore::new();
        let path = DocPath::comment("c");
        store
            .seed(&path, json!({ "likeCount": 0 }).as_object().cloned().unwrap())
            .unwrap();
        for _ in 0..3 {
            store.interfere_before_commit(path.clone(), Patch::new().increment("likeCount", 1));
        }
        let err = transact(&store, 3, |tx| {
            tx.get(&path)?;
            tx.update(&path, Patch::new().increment("likeCount", 1));
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, StoreError::Aborted { attempts: 3 });
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let store = InMemoryStore::new();
        let path = DocPath::task("t");
        store.seed(&path, Document::new()).unwrap();
        store.fail_next(
            OpKind::Delete,
            Some(path.clone()),
            StoreError::PermissionDenied("nope".to_owned()),
        );
        assert!(store.delete(&path).await.is_err());
        assert!(store.delete(&path).await.is_ok());
        assert!(store.is_empty("tasks"));
    }
}
