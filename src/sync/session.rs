#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, StoreError};
use crate::mutation::feedback::{Action, Feedback};
use crate::store::{
    DocPath, DocSnapshot, Filter, Query, QuerySnapshot, RemoteStore, Subscription, TASKS,
    decode_all,
};
use crate::sync::hierarchy::HierarchyIndex;
use crate::sync::pending::PendingDeletions;
use crate::sync::reconcile::Reconciler;
use crate::sync::tree::{ExpansionState, Forest, Row};
use crate::task::tags::union_sorted;
use crate::task::{DisplayUser, TagRegistry, Task, UserDirectory, UserInfo};

const FEEDBACK_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Tasks { version: u64 },
    Project { version: u64 },
    Notice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDivergence {
    pub parent_id: String,
    pub missing: Vec<String>,
    pub stale: Vec<String>,
}

pub struct ProjectSession {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) cfg: SyncConfig,
    project_id: String,
    tasks_sub: Option<Subscription<QuerySnapshot>>,
    project_sub: Option<Subscription<DocSnapshot>>,
    pub(crate) reconciler: Reconciler,
    pub(crate) pending: PendingDeletions,
    tasks: Vec<Task>,
    forest: Forest,
    index: HierarchyIndex,
    expansion: ExpansionState,
    pub(crate) registry: TagRegistry,
    pub(crate) local_tags: BTreeSet<String>,
    users: UserDirectory,
    outage: bool,
    feedback: broadcast::Sender<Feedback>,
}

impl ProjectSession {
    pub fn open(store: Arc<dyn RemoteStore>, cfg: SyncConfig, project_id: &str) -> Result<Self> {
        cfg.validate()?;
        let tasks_sub = store.subscribe_query(
            Query::collection(TASKS).filter(Filter::eq("projectId", project_id)),
        )?;
        let project_sub = store.subscribe_doc(&DocPath::project(project_id))?;
        let (feedback, _) = broadcast::channel(FEEDBACK_CAPACITY);
        info!(%project_id, "project session opened");
        Ok(Self {
            store,
            cfg,
            project_id: project_id.to_owned(),
            tasks_sub: Some(tasks_sub),
            project_sub: Some(project_sub),
            reconciler: Reconciler::new(),
            pending: PendingDeletions::new(),
            tasks: Vec::new(),
            forest: Forest::default(),
            index: HierarchyIndex::default(),
            expansion: ExpansionState::new(),
            registry: TagRegistry::default(),
            local_tags: BTreeSet::new(),
            users: UserDirectory::new(),
            outage: false,
            feedback,
        })
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn subscribe_feedback(&self) -> broadcast::Receiver<Feedback> {
        self.feedback.subscribe()
    }

    pub(crate) fn emit(&self, fb: Feedback) {
        debug!(action = %fb.action, subject = %fb.subject, state = ?fb.state, "feedback");
        let _ = self.feedback.send(fb);
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.tasks_sub.is_none() && self.project_sub.is_none() {
            return None;
        }
        tokio::select! {
            Some(res) = recv_opt(&mut self.tasks_sub) => Some(self.on_tasks(res)),
            Some(res) = recv_opt(&mut self.project_sub) => Some(self.on_project(res)),
            else => None,
        }
    }

    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(res) = self.tasks_sub.as_mut().and_then(Subscription::try_recv) {
            events.push(self.on_tasks(res));
        }
        while let Some(res) = self.project_sub.as_mut().and_then(Subscription::try_recv) {
            events.push(self.on_project(res));
        }
        events
    }

    fn on_tasks(&mut self, res: Result<QuerySnapshot, StoreError>) -> SessionEvent {
        match res {
            Ok(snapshot) => {
                let version = snapshot.version;
                self.apply_task_snapshot(&snapshot);
                SessionEvent::Tasks { version }
            }
            Err(e) => self.on_subscription_error(&e),
        }
    }

    fn on_project(&mut self, res: Result<DocSnapshot, StoreError>) -> SessionEvent {
        match res {
            Ok(snapshot) => {
                let version = snapshot.version;
                self.apply_project_snapshot(&snapshot);
                SessionEvent::Project { version }
            }
            Err(e) => self.on_subscription_error(&e),
        }
    }

    fn on_subscription_error(&mut self, e: &StoreError) -> SessionEvent {
        let msg = format!("Live updates interrupted: {e}");
        if !self.outage {
            self.outage = true;
            warn!(project_id = %self.project_id, "subscription error: {e}");
            self.emit(Feedback::failed(Action::SyncNotice, &self.project_id, msg.clone()));
        } else {
            debug!("subscription error during ongoing outage: {e}");
        }
        SessionEvent::Notice(msg)
    }

    pub fn apply_task_snapshot(&mut self, snapshot: &QuerySnapshot) {
        self.outage = false;
        self.pending.observe(snapshot.docs.iter().map(|d| d.id.as_str()));
        let tasks: Vec<Task> = decode_all(snapshot);
        self.reconciler.apply_snapshot(tasks, snapshot.version);
        self.rebuild();
    }

    pub fn apply_project_snapshot(&mut self, snapshot: &DocSnapshot) {
        self.outage = false;
        let raw = snapshot.data.as_ref().and_then(|d| d.get("tags"));
        self.registry = TagRegistry::from_value(raw, &self.cfg.tags.default_color);
    }

    pub(crate) fn rebuild(&mut self) {
        self.tasks = self.pending.filter(self.reconciler.view());
        self.forest = Forest::build(&self.tasks, self.cfg.tree.max_depth);
        self.index = HierarchyIndex::build(&self.tasks, &self.pending);
        self.expansion.retain_known(&self.forest);
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    #[must_use]
    pub fn hierarchy(&self) -> &HierarchyIndex {
        &self.index
    }

    #[must_use]
    pub fn has_children(&self, id: &str) -> bool {
        self.task(id).is_some_and(|t| self.index.has_children(t))
    }

    #[must_use]
    pub fn is_pending_delete(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    #[must_use]
    pub fn visible_rows(&self) -> Vec<Row<'_>> {
        self.forest.visible_rows(&self.expansion)
    }

    pub fn toggle_expanded(&mut self, id: &str) -> bool {
        self.expansion.toggle(id)
    }

    #[must_use]
    pub fn expansion(&self) -> &ExpansionState {
        &self.expansion
    }

    pub fn expansion_mut(&mut self) -> &mut ExpansionState {
        &mut self.expansion
    }

    #[must_use]
    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    #[must_use]
    pub fn available_tags(&self) -> Vec<String> {
        let registry = self.registry.names();
        union_sorted(
            self.tasks
                .iter()
                .flat_map(|t| t.tags.iter())
                .chain(registry.iter())
                .chain(self.local_tags.iter()),
        )
    }

    #[must_use]
    pub fn display_user(&self, id: &str) -> DisplayUser {
        self.users.display(id)
    }

    #[must_use]
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub async fn resolve_users(&mut self) -> usize {
        let missing = self
            .users
            .missing(self.tasks.iter().flat_map(|t| t.assigned_user_ids.iter()));
        let mut resolved = 0;
        for id in missing {
            let info = match self.store.get(&DocPath::user(&id)).await {
                Ok(Some(doc)) => UserInfo::from_doc(&id, &doc),
                Ok(None) => None,
                Err(e) => {
                    debug!(user_id = %id, "user lookup failed: {e}");
                    None
                }
            };
            if self.users.merge(&id, info) {
                resolved += 1;
            }
        }
        resolved
    }

    #[must_use]
    pub fn audit_subtask_mirrors(&self) -> Vec<MirrorDivergence> {
        let mut out = Vec::new();
        for t in &self.tasks {
            let derived = self.index.children_of(&t.id);
            let missing: Vec<String> = derived
                .iter()
                .filter(|c| !t.subtask_ids.contains(c))
                .cloned()
                .collect();
            let stale: Vec<String> = t
                .subtask_ids
                .iter()
                .filter(|c| !derived.contains(c) && !self.pending.contains(c))
                .cloned()
                .collect();
            if !missing.is_empty() || !stale.is_empty() {
                out.push(MirrorDivergence {
                    parent_id: t.id.clone(),
                    missing,
                    stale,
                });
            }
        }
        out
    }

    /// Tear down every subscription. Calling it again is a no-op.
    pub fn close(&mut self) {
        let had_any = self.tasks_sub.is_some() || self.project_sub.is_some();
        if let Some(mut sub) = self.tasks_sub.take() {
            sub.cancel();
        }
        if let Some(mut sub) = self.project_sub.take() {
            sub.cancel();
        }
        if had_any {
            info!(project_id = %self.project_id, "project session closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tasks_sub.is_none() && self.project_sub.is_none()
    }
}

impl Drop for ProjectSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn recv_opt<E>(sub: &mut Option<Subscription<E>>) -> Option<Result<E, StoreError>> {
    match sub {
        Some(s) => s.recv().await,
        None => None,
    }
}
