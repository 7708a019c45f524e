#![forbid(unsafe_code)]

pub mod model;
pub mod tags;
pub mod users;

pub use model::{FieldKey, Priority, Task, TaskField, TaskStatus};
pub use tags::{AssigneeSet, OrderedSet, ProjectTag, TagRegistry, TagSet};
pub use users::{DisplayUser, UserDirectory, UserInfo};
