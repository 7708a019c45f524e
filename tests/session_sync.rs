mod common;

use common::{PROJECT, doc, ids, open_session, seed_task};
use serde_json::json;
use taskweave::StoreError;
use taskweave::TaskweaveError;
use taskweave::mutation::{Action, AlreadyConfirmed, ConfirmRequest, FeedbackState};
use taskweave::store::memory::InMemoryStore;
use taskweave::store::{DocPath, Patch, RemoteStore, TASKS};
use taskweave::sync::{IntegrityWarning, SessionEvent};
use taskweave::task::{TagRegistry, TaskField, TaskStatus};

#[tokio::test]
async fn staged_edit_shows_before_the_write_and_yields_to_later_remote_changes() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({ "status": "To Do" }));
    let mut session = open_session(&store);

    let staged = session
        .stage_update("a", vec![TaskField::Status(TaskStatus::Completed)], Action::UpdateTask)
        .expect("stage");
    assert_eq!(session.task("a").unwrap().status, TaskStatus::Completed);
    let remote = store.get(&DocPath::task("a")).await.unwrap().unwrap();
    assert_eq!(remote["status"], json!("To Do"));

    let outcome = staged.send().await;
    session.settle(outcome).expect("settle");
    session.drain();
    assert_eq!(session.task("a").unwrap().status, TaskStatus::Completed);

    // Another client changes the status afterwards; the remote value wins.
    store
        .update(&DocPath::task("a"), Patch::new().set("status", "Blocked"))
        .await
        .unwrap();
    session.drain();
    assert_eq!(session.task("a").unwrap().status, TaskStatus::Blocked);
}

#[tokio::test]
async fn outage_is_reported_once_and_keeps_state() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({}));
    let mut session = open_session(&store);
    let mut feedback = session.subscribe_feedback();

    let err = StoreError::Unavailable("connection lost".to_owned());
    store.fail_subscriptions(TASKS, err.clone());
    store.fail_subscriptions(TASKS, err.clone());
    let events = session.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| matches!(e, SessionEvent::Notice(_))));
    assert_eq!(ids(&session), vec!["a"]);

    let notices = std::iter::from_fn(|| feedback.try_recv().ok())
        .filter(|f| f.action == Action::SyncNotice)
        .count();
    assert_eq!(notices, 1);

    // Recovery, then a second outage is reported again.
    seed_task(&store, "b", json!({}));
    session.drain();
    store.fail_subscriptions(TASKS, err);
    session.drain();
    let notices = std::iter::from_fn(|| feedback.try_recv().ok())
        .filter(|f| f.action == Action::SyncNotice)
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({}));
    let mut session = open_session(&store);
    assert_eq!(store.active_subscriptions(), 2);
    session.close();
    session.close();
    assert!(session.is_closed());
    assert_eq!(store.active_subscriptions(), 0);
    assert!(session.next_event().await.is_none());

    {
        let _dropped = open_session(&store);
        assert_eq!(store.active_subscriptions(), 2);
    }
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn creating_a_tag_twice_registers_it_once() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({}));
    seed_task(&store, "b", json!({}));
    let mut session = open_session(&store);

    let first = session.create_tag("a", " urgent ").await.expect("create");
    assert!(first.added_to_task);
    assert!(first.registered);
    let again = session.create_tag("a", "urgent").await.expect("repeat");
    assert!(!again.added_to_task);
    session.create_tag("b", "urgent").await.expect("other task");
    session.drain();

    let project = store.get(&DocPath::project(PROJECT)).await.unwrap().unwrap();
    let registry = TagRegistry::from_value(project.get("tags"), "#888888");
    assert_eq!(registry.names(), vec!["urgent"]);
    assert_eq!(session.registry().names(), vec!["urgent"]);
    assert_eq!(session.available_tags(), vec!["urgent"]);
    assert!(session.task("b").unwrap().tags.contains("urgent"));
}

#[tokio::test]
async fn registry_failure_keeps_tag_for_the_session() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({}));
    let mut session = open_session(&store);
    store.fail_next(
        taskweave::store::memory::OpKind::Transaction,
        None,
        StoreError::PermissionDenied("read-only project".to_owned()),
    );

    let created = session.create_tag("a", "later").await.expect("create");
    assert!(created.added_to_task);
    assert!(!created.registered);
    session.drain();
    assert!(session.registry().is_empty());
    assert_eq!(session.available_tags(), vec!["later"]);
}

#[tokio::test]
async fn deleting_a_tag_everywhere_asks_first() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({ "tags": ["urgent", "ui"] }));
    seed_task(&store, "b", json!({ "tags": ["urgent"] }));
    seed_task(&store, "c", json!({ "tags": ["ui"] }));
    store
        .seed(
            &DocPath::project(PROJECT),
            doc(json!({ "tags": [{ "id": "t1", "name": "urgent", "color": "#ff0000" }] })),
        )
        .unwrap();
    let mut session = open_session(&store);
    assert_eq!(session.registry().names(), vec!["urgent"]);

    let deny = |req: &ConfirmRequest| {
        assert!(matches!(req, ConfirmRequest::DeleteTag { affected_tasks: 2, .. }));
        false
    };
    let err = session.delete_tag_everywhere("urgent", &deny).await.unwrap_err();
    assert!(matches!(err, TaskweaveError::Cancelled));
    assert!(session.task("a").unwrap().tags.contains("urgent"));

    let mut feedback = session.subscribe_feedback();
    let deletion = session
        .delete_tag_everywhere("urgent", &AlreadyConfirmed)
        .await
        .expect("delete tag");
    assert_eq!(deletion.updated, vec!["a", "b"]);
    assert!(deletion.registry_updated);
    session.drain();

    assert!(session.tasks().iter().all(|t| !t.tags.contains("urgent")));
    assert!(session.task("a").unwrap().tags.contains("ui"));
    assert!(!session.registry().contains("urgent"));
    assert_eq!(session.available_tags(), vec!["ui"]);

    let last = std::iter::from_fn(|| feedback.try_recv().ok())
        .filter(|f| f.action == Action::DeleteTag)
        .last()
        .expect("feedback");
    assert!(matches!(last.state, FeedbackState::Succeeded(_)));
}

#[tokio::test]
async fn forest_places_every_task_once() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({ "subtaskIds": ["b"] }));
    seed_task(&store, "b", json!({ "parentTaskId": "a", "subtaskIds": ["c"] }));
    seed_task(&store, "c", json!({ "parentTaskId": "b" }));
    seed_task(&store, "d", json!({}));
    seed_task(&store, "orphan", json!({ "parentTaskId": "missing" }));
    seed_task(&store, "x", json!({ "parentTaskId": "y" }));
    seed_task(&store, "y", json!({ "parentTaskId": "x" }));
    let mut session = open_session(&store);

    let forest = session.forest();
    assert_eq!(forest.len(), 7);
    let mut placed: Vec<&str> = forest.preorder().iter().map(|n| n.task.id.as_str()).collect();
    placed.sort_unstable();
    assert_eq!(placed, vec!["a", "b", "c", "d", "orphan", "x", "y"]);
    assert_eq!(forest.get("c").unwrap().depth, 2);
    assert!(forest.root_ids().contains(&"orphan"));
    assert!(
        forest
            .warnings()
            .iter()
            .any(|w| matches!(w, IntegrityWarning::Cycle { .. }))
    );
    assert!(
        forest
            .warnings()
            .iter()
            .any(|w| matches!(w, IntegrityWarning::DanglingParent { task_id, .. } if task_id == "orphan"))
    );

    let rows: Vec<&str> = session.visible_rows().iter().map(|r| r.task.id.as_str()).collect();
    assert!(!rows.contains(&"b"));
    assert!(session.toggle_expanded("a"));
    let rows: Vec<(String, usize)> = session
        .visible_rows()
        .iter()
        .map(|r| (r.task.id.clone(), r.depth))
        .collect();
    let pos = rows.iter().position(|(id, _)| id == "a").unwrap();
    assert_eq!(rows[pos + 1], ("b".to_owned(), 1));
    assert!(!rows.iter().any(|(id, _)| id == "c"));
    assert!(session.has_children("a"));
    assert!(!session.has_children("d"));
}

#[tokio::test]
async fn audit_reports_mirror_drift() {
    let store = InMemoryStore::new();
    seed_task(&store, "a", json!({ "subtaskIds": ["ghost"] }));
    seed_task(&store, "b", json!({ "parentTaskId": "a" }));
    let session = open_session(&store);

    let drift = session.audit_subtask_mirrors();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].parent_id, "a");
    assert_eq!(drift[0].missing, vec!["b"]);
    assert_eq!(drift[0].stale, vec!["ghost"]);
}
