#![forbid(unsafe_code)]

pub mod model;
pub mod session;
pub mod thread;
pub mod transactor;

pub use model::{Comment, NewComment, Vote};
pub use session::{CommentEvent, CommentSession};
pub use thread::CommentThread;
pub use transactor::{CommentTransactor, ReactionOutcome, VoteOutcome};
