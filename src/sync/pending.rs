#![forbid(unsafe_code)]

use std::collections::HashSet;

use tracing::debug;

use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct PendingDeletions {
    ids: HashSet<String>,
}

impl PendingDeletions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, id: &str) {
        self.ids.insert(id.to_owned());
    }

    /// Forget `id` without a confirming snapshot (the delete failed).
    pub fn unmark(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn observe<'a>(&mut self, present: impl IntoIterator<Item = &'a str>) {
        if self.ids.is_empty() {
            return;
        }
        let present: HashSet<&str> = present.into_iter().collect();
        self.ids.retain(|id| {
            let keep = present.contains(id.as_str());
            if !keep {
                debug!(task_id = %id, "deletion confirmed by snapshot");
            }
            keep
        });
    }

    #[must_use]
    pub fn filter(&self, tasks: Vec<Task>) -> Vec<Task> {
        if self.ids.is_empty() {
            return tasks;
        }
        tasks
            .into_iter()
            .filter(|t| !self.ids.contains(&t.id))
            .collect()
    }
}
