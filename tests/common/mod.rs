#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use taskweave::config::SyncConfig;
use taskweave::store::memory::InMemoryStore;
use taskweave::store::{DocPath, Document, RemoteStore};
use taskweave::sync::ProjectSession;

pub const PROJECT: &str = "p1";

pub fn doc(v: Value) -> Document {
    v.as_object().cloned().expect("object literal")
}

/// Seed a task of [`PROJECT`]; `extra` overrides the defaults.
pub fn seed_task(store: &InMemoryStore, id: &str, extra: Value) {
    let mut d = doc(json!({ "projectId": PROJECT, "name": id, "subtaskIds": [] }));
    d.extend(doc(extra));
    store.seed(&DocPath::task(id), d).expect("seed task");
}

pub fn shared(store: &InMemoryStore) -> Arc<dyn RemoteStore> {
    Arc::new(store.clone())
}

/// Open a session and apply the initial snapshots.
pub fn open_session(store: &InMemoryStore) -> ProjectSession {
    open_session_with(store, SyncConfig::default())
}

pub fn open_session_with(store: &InMemoryStore, cfg: SyncConfig) -> ProjectSession {
    let mut session = ProjectSession::open(shared(store), cfg, PROJECT).expect("open session");
    session.drain();
    session
}

pub fn ids(session: &ProjectSession) -> Vec<String> {
    let mut out: Vec<String> = session.tasks().iter().map(|t| t.id.clone()).collect();
    out.sort();
    out
}
