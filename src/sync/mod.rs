#![forbid(unsafe_code)]

pub mod hierarchy;
pub mod pending;
pub mod reconcile;
pub mod session;
pub mod tree;

pub use hierarchy::HierarchyIndex;
pub use pending::PendingDeletions;
pub use reconcile::{MutationId, Reconciler};
pub use session::{MirrorDivergence, ProjectSession, SessionEvent};
pub use tree::{ExpansionState, Forest, IntegrityWarning, Row, TreeNode};
