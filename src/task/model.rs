#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::store::Patch;
use crate::task::tags::{AssigneeSet, TagSet};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "To Do", alias = "todo")]
    ToDo,
    #[serde(rename = "In Progress", alias = "in_progress")]
    InProgress,
    #[serde(rename = "In Review", alias = "in_review")]
    InReview,
    #[serde(rename = "Blocked", alias = "blocked")]
    Blocked,
    #[serde(rename = "Completed", alias = "completed")]
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub assigned_user_ids: AssigneeSet,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    /// Redundant mirror of the children's `parent_task_id`. May lag behind.
    #[serde(default)]
    pub subtask_ids: Vec<String>,
    #[serde(default)]
    pub level: Option<u32>,
}

impl Task {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKey {
    Name,
    Description,
    Status,
    Priority,
    DueDate,
    Assignees,
    Tags,
}

impl FieldKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::DueDate => "dueDate",
            Self::Assignees => "assignedUserIds",
            Self::Tags => "tags",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskField {
    Name(String),
    Description(Option<String>),
    Status(TaskStatus),
    Priority(Option<Priority>),
    DueDate(Option<OffsetDateTime>),
    Assignees(AssigneeSet),
    Tags(TagSet),
}

impl TaskField {
    #[must_use]
    pub fn key(&self) -> FieldKey {
        match self {
            Self::Name(_) => FieldKey::Name,
            Self::Description(_) => FieldKey::Description,
            Self::Status(_) => FieldKey::Status,
            Self::Priority(_) => FieldKey::Priority,
            Self::DueDate(_) => FieldKey::DueDate,
            Self::Assignees(_) => FieldKey::Assignees,
            Self::Tags(_) => FieldKey::Tags,
        }
    }

    #[must_use]
    pub fn read(task: &Task, key: FieldKey) -> Self {
        match key {
            FieldKey::Name => Self::Name(task.name.clone()),
            FieldKey::Description => Self::Description(task.description.clone()),
            FieldKey::Status => Self::Status(task.status),
            FieldKey::Priority => Self::Priority(task.priority),
            FieldKey::DueDate => Self::DueDate(task.due_date),
            FieldKey::Assignees => Self::Assignees(task.assigned_user_ids.clone()),
            FieldKey::Tags => Self::Tags(task.tags.clone()),
        }
    }

    pub fn apply(&self, task: &mut Task) {
        match self {
            Self::Name(v) => task.name.clone_from(v),
            Self::Description(v) => task.description.clone_from(v),
            Self::Status(v) => {
                if *v == TaskStatus::Completed && task.status != TaskStatus::Completed {
                    task.completed_at = Some(OffsetDateTime::now_utc());
                } else if *v != TaskStatus::Completed {
                    task.completed_at = None;
                }
                task.status = *v;
            }
            Self::Priority(v) => task.priority = *v,
            Self::DueDate(v) => task.due_date = *v,
            Self::Assignees(v) => task.assigned_user_ids.clone_from(v),
            Self::Tags(v) => task.tags.clone_from(v),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let v = match self {
            Self::Name(v) => serde_json::to_value(v),
            Self::Description(v) => serde_json::to_value(v),
            Self::Status(v) => serde_json::to_value(v),
            Self::Priority(v) => serde_json::to_value(v),
            Self::DueDate(v) => Ok(v.map_or(Value::Null, rfc3339_value)),
            Self::Assignees(v) => serde_json::to_value(v),
            Self::Tags(v) => serde_json::to_value(v),
        };
        v.unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn write_into(&self, patch: Patch) -> Patch {
        let patch = patch.set(self.key().as_str(), self.to_value());
        match self {
            Self::Status(TaskStatus::Completed) => patch.server_timestamp("completedAt"),
            Self::Status(_) => patch.set("completedAt", Value::Null),
            _ => patch,
        }
    }
}

fn rfc3339_value(ts: OffsetDateTime) -> Value {
    ts.format(&time::format_description::well_known::Rfc3339)
        .map_or(Value::Null, Value::String)
}
