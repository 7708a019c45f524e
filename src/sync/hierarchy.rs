#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::sync::pending::PendingDeletions;
use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    children: HashMap<String, Vec<String>>,
}

impl HierarchyIndex {
    #[must_use]
    pub fn build(tasks: &[Task], pending: &PendingDeletions) -> Self {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for t in tasks {
            if pending.contains(&t.id) {
                continue;
            }
            if let Some(parent) = &t.parent_task_id
                && !pending.contains(parent)
            {
                children.entry(parent.clone()).or_default().push(t.id.clone());
            }
        }
        Self { children }
    }

    #[must_use]
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn has_children(&self, task: &Task) -> bool {
        !task.subtask_ids.is_empty() || !self.children_of(&task.id).is_empty()
    }

    pub fn parents(&self) -> impl Iterator<Item = &String> {
        self.children.keys()
    }
}
