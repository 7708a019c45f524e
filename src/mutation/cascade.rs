#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::{Result, StoreError, TaskweaveError};
use crate::mutation::feedback::{Action, ConfirmRequest, Confirmer, Feedback};
use crate::store::{DocPath, Patch, StoredDoc, TASKS};
use crate::sync::session::ProjectSession;
use crate::task::Task;

enum Step {
    Visit { id: String, parent: Option<String> },
    Emit(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub root: String,
    /// Deleted ids in delete order. Every child precedes its parent.
    pub deleted: Vec<String>,
    pub parent_detached: bool,
}

impl ProjectSession {
    pub async fn delete_subtree(
        &mut self,
        task_id: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<CascadeReport> {
        let root = self
            .task(task_id)
            .cloned()
            .ok_or_else(|| TaskweaveError::TaskNotFound(task_id.to_owned()))?;
        let order = self.plan_subtree_delete(&root).await?;

        let request = ConfirmRequest::DeleteSubtree {
            task_id: root.id.clone(),
            task_name: root.name.clone(),
            descendants: order.len().saturating_sub(1),
        };
        if !confirmer.confirm(&request) {
            debug!(task_id = %root.id, "subtree deletion declined");
            return Err(TaskweaveError::Cancelled);
        }
        self.emit(Feedback::pending(Action::DeleteSubtree, &root.id));

        let mut deleted: Vec<String> = Vec::with_capacity(order.len());
        for id in &order {
            self.pending.mark(id);
            self.reconciler.forget(id);
            self.rebuild();
            debug!(task_id = %id, "deleting task");
            if let Err(e) = self.store.delete(&DocPath::task(id)).await {
                for rest in &order[deleted.len()..] {
                    self.pending.unmark(rest);
                }
                self.rebuild();
                return Err(self.cascade_failed(&root.id, deleted.len(), order.len(), e));
            }
            deleted.push(id.clone());
        }

        let mut parent_detached = false;
        if let Some(parent_id) = &root.parent_task_id {
            let detach = Patch::new()
                .array_remove("subtaskIds", root.id.clone())
                .server_timestamp("updatedAt");
            match self.store.update(&DocPath::task(parent_id), detach).await {
                Ok(_) => parent_detached = true,
                Err(StoreError::NotFound(_)) => {
                    debug!(%parent_id, "parent already gone, nothing to detach");
                }
                Err(e) => {
                    let applied = deleted.len();
                    return Err(self.cascade_failed(&root.id, applied, applied + 1, e));
                }
            }
        }

        info!(task_id = %root.id, deleted = deleted.len(), "subtree deleted");
        self.emit(Feedback::succeeded(
            Action::DeleteSubtree,
            &root.id,
            format!("Deleted {} task(s)", deleted.len()),
        ));
        Ok(CascadeReport {
            root: root.id,
            deleted,
            parent_detached,
        })
    }

    fn cascade_failed(
        &self,
        root_id: &str,
        applied: usize,
        total: usize,
        e: StoreError,
    ) -> TaskweaveError {
        warn!(task_id = %root_id, applied, total, "subtree deletion stopped: {e}");
        self.emit(Feedback::failed(
            Action::DeleteSubtree,
            root_id,
            format!("Deleted {applied} of {total}; {e}"),
        ));
        TaskweaveError::PartialFailure {
            applied,
            total,
            first_error: e,
        }
    }

    async fn plan_subtree_delete(&self, root: &Task) -> Result<Vec<String>> {
        let view = self.reconciler.view();
        let by_id: HashMap<&str, &Task> = view.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut derived: HashMap<&str, Vec<&str>> = HashMap::new();
        for t in &view {
            if let Some(p) = t.parent_task_id.as_deref() {
                derived.entry(p).or_default().push(t.id.as_str());
            }
        }

        let mut order = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![Step::Visit {
            id: root.id.clone(),
            parent: None,
        }];

        while let Some(step) = stack.pop() {
            let (id, parent) = match step {
                Step::Emit(id) => {
                    order.push(id);
                    continue;
                }
                Step::Visit { id, parent } => (id, parent),
            };
            if !visited.insert(id.clone()) {
                warn!(task_id = %id, "task reached twice while walking subtree; skipping");
                continue;
            }

            let mirror = if id == root.id {
                root.subtask_ids.clone()
            } else if let Some(t) = by_id.get(id.as_str()) {
                t.subtask_ids.clone()
            } else {
                let Some(t) = self.fetch_task(&id).await? else {
                    debug!(task_id = %id, "listed subtask no longer exists");
                    continue;
                };
                if t.parent_task_id != parent || t.project_id != self.project_id() {
                    warn!(
                        task_id = %id,
                        parent = ?parent,
                        actual_parent = ?t.parent_task_id,
                        project_id = %t.project_id,
                        "subtaskIds lists a task outside this subtree"
                    );
                    continue;
                }
                t.subtask_ids
            };

            let mut children: Vec<String> = Vec::new();
            for c in mirror {
                match by_id.get(c.as_str()) {
                    Some(child) if child.parent_task_id.as_deref() != Some(id.as_str()) => {
                        warn!(parent = %id, child = %c, "subtaskIds lists a task with another parent");
                    }
                    _ => {
                        if !children.contains(&c) {
                            children.push(c);
                        }
                    }
                }
            }
            for &c in derived.get(id.as_str()).map(Vec::as_slice).unwrap_or(&[]) {
                if !children.iter().any(|k| k == c) {
                    warn!(parent = %id, child = %c, "subtaskIds is missing a derived child");
                    children.push(c.to_owned());
                }
            }

            stack.push(Step::Emit(id.clone()));
            for c in children.into_iter().rev() {
                if !visited.contains(&c) {
                    stack.push(Step::Visit {
                        id: c,
                        parent: Some(id.clone()),
                    });
                }
            }
        }
        Ok(order)
    }

    async fn fetch_task(&self, id: &str) -> Result<Option<Task>> {
        let Some(data) = self.store.get(&DocPath::task(id)).await? else {
            return Ok(None);
        };
        let doc = StoredDoc {
            id: id.to_owned(),
            data,
        };
        match doc.decode::<Task>(TASKS) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                warn!("{e}");
                Ok(None)
            }
        }
    }
}
