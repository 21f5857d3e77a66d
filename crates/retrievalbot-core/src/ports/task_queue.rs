//! TaskQueue port - the shared queue between scheduler and workers.
//!
//! The scheduler inserts, workers lease and complete, the reaper sweeps.
//! Nothing else touches queue records.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LeaseToken, Module, StoreError, Task};

/// A task held by one worker.
///
/// The worker must persist the result *before* calling [`complete`],
/// so a crash in between leaves the task leased and the reaper re-queues it.
///
/// [`complete`]: TaskLease::complete
#[async_trait]
pub trait TaskLease: Send {
    fn task(&self) -> &Task;

    fn token(&self) -> LeaseToken;

    /// Record the terminal state and remove the task from the queue.
    ///
    /// Fails with [`StoreError::LeaseLost`] if the lease expired and the
    /// task was handed to someone else meanwhile.
    async fn complete(self: Box<Self>, success: bool) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Number of undrained tasks (queued or leased) for a requester.
    async fn count(&self, requester: &str) -> Result<usize, StoreError>;

    async fn insert_many(&self, tasks: Vec<Task>) -> Result<(), StoreError>;

    /// Lease the oldest queued task of `module`, if any. Never waits.
    async fn lease(&self, module: Module) -> Result<Option<Box<dyn TaskLease>>, StoreError>;

    /// Re-queue tasks whose lease ran out and drop tasks older than the
    /// configured maximum age.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError>;

    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub requeued: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub queued: usize,
    pub leased: usize,
}

/// Queue depth per requester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub by_requester: BTreeMap<String, StateCounts>,
}

impl QueueCounts {
    pub fn total(&self) -> StateCounts {
        self.by_requester
            .values()
            .fold(StateCounts::default(), |acc, c| StateCounts {
                queued: acc.queued + c.queued,
                leased: acc.leased + c.leased,
            })
    }
}
