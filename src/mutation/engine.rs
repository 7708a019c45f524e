#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError, TaskweaveError};
use crate::mutation::feedback::{Action, ConfirmRequest, Confirmer, Feedback};
use crate::store::{DocPath, Patch, RemoteStore, TASKS, WriteReceipt, transact};
use crate::sync::reconcile::MutationId;
use crate::sync::session::ProjectSession;
use crate::task::tags::normalize_tag;
use crate::task::{AssigneeSet, Priority, TagRegistry, TagSet, TaskField, TaskStatus};

pub struct StagedWrite {
    store: Arc<dyn RemoteStore>,
    task_id: String,
    action: Action,
    mutations: Vec<MutationId>,
    patch: Patch,
}

impl StagedWrite {
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    fn abandon(self, error: StoreError) -> WriteOutcome {
        WriteOutcome {
            task_id: self.task_id,
            action: self.action,
            mutations: self.mutations,
            result: Err(error),
        }
    }

    pub async fn send(self) -> WriteOutcome {
        let result = self
            .store
            .update(&DocPath::task(&self.task_id), self.patch)
            .await;
        WriteOutcome {
            task_id: self.task_id,
            action: self.action,
            mutations: self.mutations,
            result,
        }
    }
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub task_id: String,
    pub action: Action,
    mutations: Vec<MutationId>,
    pub result: Result<WriteReceipt, StoreError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskEdit {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Option<Priority>>,
    pub due_date: Option<Option<OffsetDateTime>>,
    pub assignees: Option<AssigneeSet>,
    pub tags: Option<TagSet>,
}

impl TaskEdit {
    fn into_fields(self) -> Vec<TaskField> {
        let mut fields = Vec::new();
        if let Some(v) = self.name {
            fields.push(TaskField::Name(v));
        }
        if let Some(v) = self.description {
            fields.push(TaskField::Description(v));
        }
        if let Some(v) = self.status {
            fields.push(TaskField::Status(v));
        }
        if let Some(v) = self.priority {
            fields.push(TaskField::Priority(v));
        }
        if let Some(v) = self.due_date {
            fields.push(TaskField::DueDate(v));
        }
        if let Some(v) = self.assignees {
            fields.push(TaskField::Assignees(v));
        }
        if let Some(v) = self.tags {
            fields.push(TaskField::Tags(v));
        }
        fields
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub due_date: Option<OffsetDateTime>,
    pub tags: TagSet,
    pub assignees: AssigneeSet,
    pub parent_id: Option<String>,
}

impl NewTask {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn under(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_owned());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagCreation {
    pub added_to_task: bool,
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDeletion {
    pub tag: String,
    pub updated: Vec<String>,
    pub registry_updated: bool,
}

impl ProjectSession {
    pub fn stage_update(
        &mut self,
        task_id: &str,
        fields: Vec<TaskField>,
        action: Action,
    ) -> Result<StagedWrite> {
        let staged = self.stage_fields(task_id, fields, action)?;
        self.emit(Feedback::pending(action, task_id));
        Ok(staged)
    }

    pub fn settle(&mut self, outcome: WriteOutcome) -> Result<WriteReceipt> {
        let task_id = outcome.task_id.clone();
        let action = outcome.action;
        match self.finish(outcome) {
            Ok(receipt) => {
                self.emit(Feedback::succeeded(action, &task_id, "Saved"));
                Ok(receipt)
            }
            Err(e) => {
                self.emit(Feedback::failed(action, &task_id, e.to_string()));
                Err(e.into())
            }
        }
    }

    fn stage_fields(
        &mut self,
        task_id: &str,
        fields: Vec<TaskField>,
        action: Action,
    ) -> Result<StagedWrite> {
        if self.task(task_id).is_none() {
            return Err(TaskweaveError::TaskNotFound(task_id.to_owned()));
        }
        let fields = fields
            .into_iter()
            .map(|field| match field {
                TaskField::Name(name) => validate_name(&name).map(TaskField::Name),
                other => Ok(other),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut patch = Patch::new();
        let mut mutations = Vec::with_capacity(fields.len());
        for field in fields {
            patch = field.write_into(patch);
            let m = self
                .reconciler
                .stage(task_id, field)
                .ok_or_else(|| TaskweaveError::TaskNotFound(task_id.to_owned()))?;
            mutations.push(m);
        }
        self.rebuild();
        Ok(StagedWrite {
            store: Arc::clone(&self.store),
            task_id: task_id.to_owned(),
            action,
            mutations,
            patch: patch.server_timestamp("updatedAt"),
        })
    }

    fn finish(&mut self, outcome: WriteOutcome) -> Result<WriteReceipt, StoreError> {
        match outcome.result {
            Ok(receipt) => {
                for m in outcome.mutations {
                    self.reconciler.acknowledge(m, receipt);
                }
                self.rebuild();
                Ok(receipt)
            }
            Err(e) => {
                let rollback = self.cfg.mutations.rollback_on_failure;
                for m in outcome.mutations {
                    self.reconciler.fail(m, rollback);
                }
                self.rebuild();
                warn!(task_id = %outcome.task_id, rollback, "task write failed: {e}");
                Err(e)
            }
        }
    }

    async fn commit_fields(
        &mut self,
        task_id: &str,
        fields: Vec<TaskField>,
        action: Action,
    ) -> Result<WriteReceipt> {
        let staged = self.stage_update(task_id, fields, action)?;
        let outcome = staged.send().await;
        self.settle(outcome)
    }

    pub async fn update_status(&mut self, task_id: &str, status: TaskStatus) -> Result<WriteReceipt> {
        self.commit_fields(task_id, vec![TaskField::Status(status)], Action::UpdateTask)
            .await
    }

    pub async fn update_priority(
        &mut self,
        task_id: &str,
        priority: Option<Priority>,
    ) -> Result<WriteReceipt> {
        self.commit_fields(task_id, vec![TaskField::Priority(priority)], Action::UpdateTask)
            .await
    }

    pub async fn update_due_date(
        &mut self,
        task_id: &str,
        due: Option<OffsetDateTime>,
    ) -> Result<WriteReceipt> {
        self.commit_fields(task_id, vec![TaskField::DueDate(due)], Action::UpdateTask)
            .await
    }

    pub async fn set_assignees(
        &mut self,
        task_id: &str,
        assignees: AssigneeSet,
    ) -> Result<WriteReceipt> {
        self.commit_fields(task_id, vec![TaskField::Assignees(assignees)], Action::UpdateTask)
            .await
    }

    pub async fn toggle_assignee(&mut self, task_id: &str, user_id: &str) -> Result<WriteReceipt> {
        let mut assignees = self
            .task(task_id)
            .map(|t| t.assigned_user_ids.clone())
            .ok_or_else(|| TaskweaveError::TaskNotFound(task_id.to_owned()))?;
        assignees.toggle(user_id);
        self.set_assignees(task_id, assignees).await
    }

    pub async fn set_tags(&mut self, task_id: &str, tags: TagSet) -> Result<WriteReceipt> {
        self.commit_fields(task_id, vec![TaskField::Tags(tags)], Action::UpdateTask)
            .await
    }

    pub async fn toggle_tag(&mut self, task_id: &str, tag: &str) -> Result<WriteReceipt> {
        let tag = normalize_tag(tag).ok_or_else(|| TaskweaveError::InvalidTag(tag.to_owned()))?;
        let mut tags = self
            .task(task_id)
            .map(|t| t.tags.clone())
            .ok_or_else(|| TaskweaveError::TaskNotFound(task_id.to_owned()))?;
        tags.toggle(&tag);
        self.set_tags(task_id, tags).await
    }

    pub async fn edit_task(&mut self, task_id: &str, edit: TaskEdit) -> Result<WriteReceipt> {
        let fields = edit.into_fields();
        if fields.is_empty() {
            return Err(TaskweaveError::EmptyEdit);
        }
        self.commit_fields(task_id, fields, Action::UpdateTask).await
    }

    pub async fn create_task(&mut self, new: NewTask) -> Result<String> {
        let name = validate_name(&new.name)?;
        self.emit(Feedback::pending(Action::CreateTask, &name));

        let level = match &new.parent_id {
            Some(parent_id) => match self.child_level(parent_id).await {
                Ok(level) => level,
                Err(e) => {
                    self.emit(Feedback::failed(Action::CreateTask, &name, e.to_string()));
                    return Err(e);
                }
            },
            None => 0,
        };

        let mut patch = Patch::new()
            .set("projectId", self.project_id())
            .set("name", name.clone())
            .set("description", new.description.clone().map_or(Value::Null, Value::String))
            .set_json("status", &new.status)
            .set_json("priority", &new.priority)
            .set("dueDate", TaskField::DueDate(new.due_date).to_value())
            .set_json("tags", &new.tags)
            .set_json("assignedUserIds", &new.assignees)
            .set(
                "parentTaskId",
                new.parent_id.clone().map_or(Value::Null, Value::String),
            )
            .set("subtaskIds", Value::Array(Vec::new()))
            .set("level", level)
            .server_timestamp("createdAt")
            .server_timestamp("updatedAt");
        if new.status == TaskStatus::Completed {
            patch = patch.server_timestamp("completedAt");
        }

        let (id, _) = match self.store.create(TASKS, patch).await {
            Ok(created) => created,
            Err(e) => {
                self.emit(Feedback::failed(Action::CreateTask, &name, e.to_string()));
                return Err(e.into());
            }
        };
        info!(task_id = %id, parent = ?new.parent_id, "task created");

        if let Some(parent_id) = &new.parent_id {
            let link = Patch::new()
                .array_union("subtaskIds", id.clone())
                .server_timestamp("updatedAt");
            if let Err(e) = self.store.update(&DocPath::task(parent_id), link).await {
                warn!(task_id = %id, %parent_id, "failed to link subtask into parent: {e}");
                self.emit(Feedback::failed(Action::CreateTask, &name, e.to_string()));
                return Err(TaskweaveError::PartialFailure {
                    applied: 1,
                    total: 2,
                    first_error: e,
                });
            }
            self.expansion_mut().expand(parent_id);
        }

        self.emit(Feedback::succeeded(Action::CreateTask, &name, "Task created"));
        Ok(id)
    }

    async fn child_level(&self, parent_id: &str) -> Result<u32> {
        if self.is_pending_delete(parent_id) {
            return Err(TaskweaveError::ParentNotFound(parent_id.to_owned()));
        }
        let parent = self
            .store
            .get(&DocPath::task(parent_id))
            .await?
            .ok_or_else(|| TaskweaveError::ParentNotFound(parent_id.to_owned()))?;
        let parent_level = parent
            .get("level")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
            .or_else(|| {
                self.forest()
                    .get(parent_id)
                    .and_then(|n| u32::try_from(n.depth).ok())
            })
            .unwrap_or(0);
        Ok(parent_level.saturating_add(1))
    }

    pub async fn create_tag(&mut self, task_id: &str, raw: &str) -> Result<TagCreation> {
        let name = normalize_tag(raw).ok_or_else(|| TaskweaveError::InvalidTag(raw.to_owned()))?;
        let tags = self
            .task(task_id)
            .map(|t| t.tags.clone())
            .ok_or_else(|| TaskweaveError::TaskNotFound(task_id.to_owned()))?;
        self.emit(Feedback::pending(Action::CreateTag, &name));
        let fresh = self.local_tags.insert(name.clone());

        let mut added_to_task = false;
        if !tags.contains(&name) {
            let mut tags = tags;
            tags.insert(name.clone());
            let staged = self.stage_fields(task_id, vec![TaskField::Tags(tags)], Action::CreateTag);
            let written = match staged {
                Ok(staged) => {
                    let outcome = staged.send().await;
                    self.finish(outcome).map_err(TaskweaveError::from)
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if fresh {
                    self.local_tags.remove(&name);
                }
                self.emit(Feedback::failed(Action::CreateTag, &name, e.to_string()));
                return Err(e);
            }
            added_to_task = true;
        }

        let color = self.cfg.tags.default_color.clone();
        let registered = match self.union_into_registry(&name, &color).await {
            Ok(changed) => {
                if changed {
                    self.registry.union(&name, &color);
                }
                self.local_tags.remove(&name);
                true
            }
            Err(e) => {
                warn!(tag = %name, "tag registry update failed, keeping tag for this session: {e}");
                false
            }
        };

        let msg = if registered {
            "Tag added"
        } else {
            "Tag added to task; not saved to project tags"
        };
        self.emit(Feedback::succeeded(Action::CreateTag, &name, msg));
        Ok(TagCreation {
            added_to_task,
            registered,
        })
    }

    async fn union_into_registry(&self, name: &str, color: &str) -> Result<bool, StoreError> {
        let path = DocPath::project(self.project_id());
        let (changed, _) = transact(
            self.store.as_ref(),
            self.cfg.transactions.max_attempts,
            |tx| {
                let doc = tx.get(&path)?;
                let mut registry =
                    TagRegistry::from_value(doc.as_ref().and_then(|d| d.get("tags")), color);
                if !registry.union(name, color) {
                    return Ok(false);
                }
                let patch = Patch::new().set("tags", registry.to_value());
                if doc.is_some() {
                    tx.update(&path, patch);
                } else {
                    tx.set(&path, patch);
                }
                Ok(true)
            },
        )
        .await?;
        Ok(changed)
    }

    async fn remove_from_registry(&self, name: &str) -> Result<bool, StoreError> {
        let path = DocPath::project(self.project_id());
        let color = self.cfg.tags.default_color.clone();
        let (changed, _) = transact(
            self.store.as_ref(),
            self.cfg.transactions.max_attempts,
            |tx| {
                let Some(doc) = tx.get(&path)? else {
                    return Ok(false);
                };
                let mut registry = TagRegistry::from_value(doc.get("tags"), &color);
                if !registry.remove(name) {
                    return Ok(false);
                }
                tx.update(&path, Patch::new().set("tags", registry.to_value()));
                Ok(true)
            },
        )
        .await?;
        Ok(changed)
    }

    pub async fn delete_tag_everywhere(
        &mut self,
        tag: &str,
        confirmer: &dyn Confirmer,
    ) -> Result<TagDeletion> {
        let name = normalize_tag(tag).ok_or_else(|| TaskweaveError::InvalidTag(tag.to_owned()))?;
        let affected: Vec<(String, TagSet)> = self
            .tasks()
            .iter()
            .filter(|t| t.tags.contains(&name))
            .map(|t| (t.id.clone(), t.tags.clone()))
            .collect();

        let request = ConfirmRequest::DeleteTag {
            tag: name.clone(),
            affected_tasks: affected.len(),
        };
        if !confirmer.confirm(&request) {
            debug!(tag = %name, "tag deletion declined");
            return Err(TaskweaveError::Cancelled);
        }
        let mut staged = Vec::with_capacity(affected.len());
        for (task_id, mut tags) in affected {
            tags.remove(&name);
            staged.push(self.stage_fields(&task_id, vec![TaskField::Tags(tags)], Action::DeleteTag)?);
        }
        let total = staged.len() + 1;
        self.emit(Feedback::pending(Action::DeleteTag, &name));

        self.local_tags.remove(&name);
        self.registry.remove(&name);

        let sem = Arc::new(Semaphore::new(self.cfg.mutations.bulk_write_concurrency.max(1)));
        let mut joinset: JoinSet<WriteOutcome> = JoinSet::new();
        let mut unsent = Vec::new();
        for write in staged {
            match Arc::clone(&sem).acquire_owned().await {
                Ok(permit) => {
                    joinset.spawn(async move {
                        let _permit = permit;
                        write.send().await
                    });
                }
                Err(_) => unsent.push(write.abandon(StoreError::Unavailable(
                    "bulk write semaphore closed".to_owned(),
                ))),
            }
        }

        let mut updated = Vec::new();
        let mut first_error: Option<StoreError> = None;
        for outcome in unsent {
            if let Err(e) = self.finish(outcome) {
                first_error.get_or_insert(e);
            }
        }
        while let Some(res) = joinset.join_next().await {
            match res {
                Ok(outcome) => {
                    let task_id = outcome.task_id.clone();
                    match self.finish(outcome) {
                        Ok(_) => updated.push(task_id),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(e) => {
                    warn!("tag removal write task failed: {e}");
                    first_error.get_or_insert(StoreError::Unavailable(e.to_string()));
                }
            }
        }
        updated.sort();

        let registry_updated = match self.remove_from_registry(&name).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(tag = %name, "failed to remove tag from registry: {e}");
                first_error.get_or_insert(e);
                false
            }
        };

        if let Some(first_error) = first_error {
            let applied = updated.len() + usize::from(registry_updated);
            self.emit(Feedback::failed(
                Action::DeleteTag,
                &name,
                format!("Tag removed from {} of {} task(s)", updated.len(), total - 1),
            ));
            return Err(TaskweaveError::PartialFailure {
                applied,
                total,
                first_error,
            });
        }

        info!(tag = %name, tasks = updated.len(), "tag deleted");
        self.emit(Feedback::succeeded(Action::DeleteTag, &name, "Tag deleted"));
        Ok(TagDeletion {
            tag: name,
            updated,
            registry_updated,
        })
    }
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TaskweaveError::InvalidName(
            "task name must not be empty".to_owned(),
        ));
    }
    Ok(name.to_owned())
}
