//! Task lifecycle inside the shared queue.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Queued -> Leased -> Succeeded -> (removed)
/// - Queued -> Leased -> Failed -> (removed)
/// - Queued -> Leased -> Queued (lease expired and swept)
///
/// Terminal states only exist between "result persisted" and "task
/// removed"; a record never leaves a terminal state except by removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker of its module.
    Queued,

    /// Held by a worker until the lease expires.
    Leased,

    /// Result recorded, attempt succeeded.
    Succeeded,

    /// Result recorded, attempt failed.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn is_leasable(self) -> bool {
        matches!(self, TaskState::Queued)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Leased) | (Leased, Succeeded) | (Leased, Failed) | (Leased, Queued)
        )
    }
}
