#![forbid(unsafe_code)]

use thiserror::Error;

use crate::store::DocPath;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocPath),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transaction aborted after {attempts} attempts")]
    Aborted { attempts: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to decode {path}: {msg}")]
    Decode { path: DocPath, msg: String },
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Aborted { .. })
    }
}

#[derive(Debug, Error)]
pub enum TaskweaveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("parent task not found: {0}")]
    ParentNotFound(String),

    #[error("comment not found: {0}")]
    CommentNotFound(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    #[error("comment text must not be empty")]
    EmptyComment,

    #[error("edit changes nothing")]
    EmptyEdit,

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("{applied} of {total} writes applied; first failure: {first_error}")]
    PartialFailure {
        applied: usize,
        total: usize,
        first_error: StoreError,
    },
}

pub type Result<T, E = TaskweaveError> = std::result::Result<T, E>;
