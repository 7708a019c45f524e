#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod comments;
pub mod config;
pub mod error;
pub mod mutation;
pub mod store;
pub mod sync;
pub mod task;
pub mod telemetry;

pub use error::{StoreError, TaskweaveError};
