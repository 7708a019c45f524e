#![forbid(unsafe_code)]

pub mod cascade;
pub mod engine;
pub mod feedback;

pub use cascade::CascadeReport;
pub use engine::{NewTask, StagedWrite, TagCreation, TagDeletion, TaskEdit, WriteOutcome};
pub use feedback::{Action, AlreadyConfirmed, ConfirmRequest, Confirmer, Feedback, FeedbackState};
