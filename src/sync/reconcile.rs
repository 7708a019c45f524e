#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::store::WriteReceipt;
use crate::task::{FieldKey, Task, TaskField};

pub type MutationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlayState {
    InFlight,
    Acked { version: u64 },
    /// Write rejected. Kept until a snapshot newer than `after` replaces it.
    Failed { after: u64 },
}

#[derive(Debug, Clone)]
struct Overlay {
    mutation: MutationId,
    value: TaskField,
    shadow: TaskField,
    state: OverlayState,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    server: HashMap<String, Task>,
    order: Vec<String>,
    version: u64,
    overlays: BTreeMap<(String, FieldKey), Overlay>,
    next_mutation: MutationId,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn apply_snapshot(&mut self, tasks: Vec<Task>, version: u64) -> usize {
        self.version = self.version.max(version);
        self.order = tasks.iter().map(|t| t.id.clone()).collect();
        self.server = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        let before = self.overlays.len();
        self.overlays.retain(|(task_id, key), o| {
            let keep = match o.state {
                OverlayState::InFlight => true,
                OverlayState::Acked { version: v } => version < v,
                OverlayState::Failed { after } => version <= after,
            };
            if !keep {
                debug!(%task_id, field = key.as_str(), "optimistic value released");
            }
            keep
        });
        before - self.overlays.len()
    }

    pub fn stage(&mut self, task_id: &str, value: TaskField) -> Option<MutationId> {
        let current = self.task(task_id)?;
        let key = value.key();
        let shadow = TaskField::read(&current, key);
        self.next_mutation += 1;
        let mutation = self.next_mutation;
        self.overlays.insert(
            (task_id.to_owned(), key),
            Overlay {
                mutation,
                value,
                shadow,
                state: OverlayState::InFlight,
            },
        );
        Some(mutation)
    }

    pub fn acknowledge(&mut self, mutation: MutationId, receipt: WriteReceipt) {
        let applied = self.version;
        let Some(slot) = self.slot_of(mutation) else {
            return;
        };
        if applied >= receipt.version {
            self.overlays.remove(&slot);
        } else if let Some(o) = self.overlays.get_mut(&slot) {
            o.state = OverlayState::Acked {
                version: receipt.version,
            };
        }
    }

    pub fn fail(&mut self, mutation: MutationId, rollback: bool) {
        let after = self.version;
        let Some(slot) = self.slot_of(mutation) else {
            return;
        };
        if let Some(o) = self.overlays.get_mut(&slot) {
            if rollback {
                o.value = o.shadow.clone();
            }
            o.state = OverlayState::Failed { after };
        }
    }

    pub fn forget(&mut self, task_id: &str) {
        self.overlays.retain(|(id, _), _| id != task_id);
    }

    #[must_use]
    pub fn has_pending(&self, task_id: &str, key: FieldKey) -> bool {
        self.overlays.contains_key(&(task_id.to_owned(), key))
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.overlays.len()
    }

    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<Task> {
        let mut task = self.server.get(task_id)?.clone();
        self.overlay_onto(&mut task);
        Some(task)
    }

    #[must_use]
    pub fn view(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.server.get(id))
            .map(|t| {
                let mut t = t.clone();
                self.overlay_onto(&mut t);
                t
            })
            .collect()
    }

    fn overlay_onto(&self, task: &mut Task) {
        let key = (task.id.clone(), FieldKey::Name);
        for ((id, _), o) in self.overlays.range(key..) {
            if *id != task.id {
                break;
            }
            o.value.apply(task);
        }
    }

    fn slot_of(&self, mutation: MutationId) -> Option<(String, FieldKey)> {
        self.overlays
            .iter()
            .find(|(_, o)| o.mutation == mutation)
            .map(|(k, _)| k.clone())
    }
}
