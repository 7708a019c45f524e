#![forbid(unsafe_code)]

pub mod memory;
mod patch;
mod query;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use patch::{FieldOp, Patch};
pub use query::{Direction, Filter, OrderBy, Query};

pub type Document = serde_json::Map<String, serde_json::Value>;

pub const TASKS: &str = "tasks";
pub const COMMENTS: &str = "comments";
pub const PROJECTS: &str = "projects";
pub const USERS: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    #[must_use]
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_owned(),
            id: id.to_owned(),
        }
    }

    #[must_use]
    pub fn task(id: &str) -> Self {
        Self::new(TASKS, id)
    }

    #[must_use]
    pub fn comment(id: &str) -> Self {
        Self::new(COMMENTS, id)
    }

    #[must_use]
    pub fn project(id: &str) -> Self {
        Self::new(PROJECTS, id)
    }

    #[must_use]
    pub fn user(id: &str) -> Self {
        Self::new(USERS, id)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteReceipt {
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub id: String,
    pub data: Document,
}

impl StoredDoc {
    pub fn decode<T: DeserializeOwned>(&self, collection: &str) -> Result<T, StoreError> {
        let mut data = self.data.clone();
        data.insert("id".to_owned(), serde_json::Value::String(self.id.clone()));
        serde_json::from_value(serde_json::Value::Object(data)).map_err(|e| StoreError::Decode {
            path: DocPath::new(collection, &self.id),
            msg: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    pub collection: String,
    pub version: u64,
    pub docs: Vec<StoredDoc>,
}

impl QuerySnapshot {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.docs.iter().any(|d| d.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocSnapshot {
    pub path: DocPath,
    pub version: u64,
    pub data: Option<Document>,
}

pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<Result<E, StoreError>>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<E> Subscription<E> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Result<E, StoreError>>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub async fn recv(&mut self) -> Option<Result<E, StoreError>> {
        if self.cancel.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Result<E, StoreError>> {
        if self.cancel.is_none() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            self.rx.close();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

pub trait TxHandle: Send {
    fn get(&mut self, path: &DocPath) -> Result<Option<Document>, StoreError>;
    fn update(&mut self, path: &DocPath, patch: Patch);
    fn set(&mut self, path: &DocPath, fields: Patch);
}

pub type TxBody<'a> = dyn FnMut(&mut dyn TxHandle) -> Result<(), StoreError> + Send + 'a;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<QuerySnapshot, StoreError>;

    async fn create(
        &self,
        collection: &str,
        fields: Patch,
    ) -> Result<(String, WriteReceipt), StoreError>;

    async fn set(&self, path: &DocPath, fields: Patch) -> Result<WriteReceipt, StoreError>;

    async fn update(&self, path: &DocPath, patch: Patch) -> Result<WriteReceipt, StoreError>;

    /// Delete a document. Deleting an absent document succeeds.
    async fn delete(&self, path: &DocPath) -> Result<WriteReceipt, StoreError>;

    async fn run_transaction(
        &self,
        body: &mut TxBody<'_>,
        max_attempts: u32,
    ) -> Result<WriteReceipt, StoreError>;

    fn subscribe_doc(&self, path: &DocPath) -> Result<Subscription<DocSnapshot>, StoreError>;

    fn subscribe_query(&self, query: Query) -> Result<Subscription<QuerySnapshot>, StoreError>;
}

pub async fn transact<T, F>(
    store: &dyn RemoteStore,
    max_attempts: u32,
    mut body: F,
) -> Result<(T, WriteReceipt), StoreError>
where
    T: Send,
    F: FnMut(&mut dyn TxHandle) -> Result<T, StoreError> + Send,
{
    let mut out: Option<T> = None;
    let receipt = store
        .run_transaction(
            &mut |tx: &mut dyn TxHandle| {
                out = Some(body(tx)?);
                Ok(())
            },
            max_attempts,
        )
        .await?;
    let value = out.ok_or(StoreError::Aborted { attempts: 0 })?;
    Ok((value, receipt))
}

pub fn decode_all<T: DeserializeOwned>(snapshot: &QuerySnapshot) -> Vec<T> {
    let mut out = Vec::with_capacity(snapshot.docs.len());
    for doc in &snapshot.docs {
        match doc.decode(&snapshot.collection) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!("skipping undecodable document: {e}"),
        }
    }
    out
}
