//! Task record: task + lifecycle metadata.

use chrono::{DateTime, Utc};

use crate::domain::{LeaseToken, Task, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lease {
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

/// Single source of truth for one queued task. The ready lists hold
/// `TaskId`s only; every state change happens here.
#[derive(Debug, Clone)]
pub(crate) struct TaskRecord {
    pub task: Task,
    pub state: TaskState,
    pub lease: Option<Lease>,

    /// Number of times this task has been leased.
    pub leases: u32,

    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            task,
            state: TaskState::Queued,
            lease: None,
            leases: 0,
            enqueued_at: now,
            updated_at: now,
        }
    }

    pub fn start_lease(&mut self, lease: Lease, now: DateTime<Utc>) {
        debug_assert!(self.state.can_transition_to(TaskState::Leased));
        self.state = TaskState::Leased;
        self.lease = Some(lease);
        self.leases += 1;
        self.updated_at = now;
    }

    pub fn holds(&self, token: LeaseToken) -> bool {
        self.state == TaskState::Leased && self.lease.is_some_and(|l| l.token == token)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Leased && self.lease.is_some_and(|l| l.expires_at <= now)
    }

    pub fn finish(&mut self, success: bool, now: DateTime<Utc>) {
        let next = if success {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        debug_assert!(self.state.can_transition_to(next));
        self.state = next;
        self.updated_at = now;
    }

    /// Lease ran out: back to Queued.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Queued;
        self.lease = None;
        self.updated_at = now;
    }
}
