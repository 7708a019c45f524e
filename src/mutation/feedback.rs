#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackState {
    Pending,
    Succeeded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub action: Action,
    pub subject: String,
    pub state: FeedbackState,
}

impl Feedback {
    #[must_use]
    pub fn pending(action: Action, subject: &str) -> Self {
        Self {
            action,
            subject: subject.to_owned(),
            state: FeedbackState::Pending,
        }
    }

    #[must_use]
    pub fn succeeded(action: Action, subject: &str, msg: impl Into<String>) -> Self {
        Self {
            action,
            subject: subject.to_owned(),
            state: FeedbackState::Succeeded(msg.into()),
        }
    }

    #[must_use]
    pub fn failed(action: Action, subject: &str, msg: impl Into<String>) -> Self {
        Self {
            action,
            subject: subject.to_owned(),
            state: FeedbackState::Failed(msg.into()),
        }
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self.state, FeedbackState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    UpdateTask,
    CreateTask,
    DeleteSubtree,
    CreateTag,
    DeleteTag,
    SyncNotice,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UpdateTask => "update task",
            Self::CreateTask => "create task",
            Self::DeleteSubtree => "delete task",
            Self::CreateTag => "create tag",
            Self::DeleteTag => "delete tag",
            Self::SyncNotice => "sync",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    DeleteSubtree {
        task_id: String,
        task_name: String,
        descendants: usize,
    },
    DeleteTag {
        tag: String,
        affected_tasks: usize,
    },
}

impl fmt::Display for ConfirmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteSubtree {
                task_name,
                descendants,
                ..
            } => write!(
                f,
                "Delete \"{task_name}\" and {descendants} subtask(s)? This cannot be undone."
            ),
            Self::DeleteTag {
                tag,
                affected_tasks,
            } => write!(
                f,
                "Delete tag \"{tag}\"? It will be removed from {affected_tasks} task(s)."
            ),
        }
    }
}

pub trait Confirmer {
    fn confirm(&self, request: &ConfirmRequest) -> bool;
}

impl<F> Confirmer for F
where
    F: Fn(&ConfirmRequest) -> bool,
{
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        self(request)
    }
}

/// Confirms everything. For callers that already asked the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyConfirmed;

impl Confirmer for AlreadyConfirmed {
    fn confirm(&self, _request: &ConfirmRequest) -> bool {
        true
    }
}
