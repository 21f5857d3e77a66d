//! In-memory task queue with lease tracking.

mod record;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use self::record::{Lease, TaskRecord};
use crate::domain::{LeaseToken, Module, StoreError, Task, TaskId, TaskState};
use crate::ports::{Clock, QueueCounts, SweepReport, TaskLease, TaskQueue};

/// Lease and expiry settings.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    /// How long a worker may hold a task before the sweep re-queues it.
    pub lease_duration: Duration,

    /// Queued tasks older than this are dropped by the sweep.
    pub max_task_age: Option<Duration>,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10 * 60),
            max_task_age: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

struct QueueState {
    records: HashMap<TaskId, TaskRecord>,

    /// Leasable tasks per module, oldest first. Between sweeps it may hold
    /// ids of records that were removed; `lease` skips those and the sweep
    /// prunes them.
    ready: HashMap<Module, VecDeque<TaskId>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            ready: HashMap::new(),
        }
    }

    fn push_ready(&mut self, module: Module, id: TaskId) {
        self.ready.entry(module).or_default().push_back(id);
    }

    fn pop_ready(&mut self, module: Module) -> Option<TaskId> {
        let queue = self.ready.get_mut(&module)?;
        while let Some(id) = queue.pop_front() {
            if self
                .records
                .get(&id)
                .is_some_and(|r| r.state.is_leasable())
            {
                return Some(id);
            }
        }
        None
    }

    /// Drop ready ids whose record is gone or no longer leasable.
    fn prune_ready(&mut self) -> usize {
        let QueueState { records, ready } = self;
        let mut pruned = 0;
        ready.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| records.get(id).is_some_and(|r| r.state.is_leasable()));
            pruned += before - ids.len();
            !ids.is_empty()
        });
        pruned
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            let entry = counts
                .by_requester
                .entry(record.task.requester.clone())
                .or_default();
            match record.state {
                TaskState::Queued => entry.queued += 1,
                TaskState::Leased => entry.leased += 1,
                // removed in the same critical section that sets them
                TaskState::Succeeded | TaskState::Failed => {}
            }
        }
        counts
    }
}

fn add(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
    policy: QueuePolicy,
}

impl InMemoryTaskQueue {
    pub fn new(clock: Arc<dyn Clock>, policy: QueuePolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            clock,
            policy,
        }
    }

    /// State of a task still in the queue.
    pub async fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.state.lock().await.records.get(&id).map(|r| r.state)
    }

    pub async fn tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state.records.values().map(|r| r.task.clone()).collect()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn count(&self, requester: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.task.requester == requester)
            .count())
    }

    async fn insert_many(&self, tasks: Vec<Task>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        for task in tasks {
            let (id, module) = (task.id, task.module);
            state.records.insert(id, TaskRecord::new(task, now));
            state.push_ready(module, id);
        }
        Ok(())
    }

    async fn lease(&self, module: Module) -> Result<Option<Box<dyn TaskLease>>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(id) = state.pop_ready(module) else {
            return Ok(None);
        };
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };

        let lease = Lease {
            token: LeaseToken::new(),
            expires_at: add(now, self.policy.lease_duration),
        };
        record.start_lease(lease, now);
        debug!(task_id = %id, %module, leases = record.leases, "task leased");

        Ok(Some(Box::new(InMemoryLease {
            task: record.task.clone(),
            token: lease.token,
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        })))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut state = self.state.lock().await;
        let mut report = SweepReport::default();

        if let Some(max_age) = self.policy.max_task_age {
            let before = state.records.len();
            state.records.retain(|_, r| {
                let live_lease = r.state == TaskState::Leased && !r.lease_expired(now);
                live_lease || add(r.enqueued_at, max_age) > now
            });
            report.expired = before - state.records.len();
        }

        let mut requeue = Vec::new();
        for (id, record) in state.records.iter_mut() {
            if record.lease_expired(now) {
                record.requeue(now);
                requeue.push((record.task.module, *id));
            }
        }
        report.requeued = requeue.len();
        for (module, id) in requeue {
            state.push_ready(module, id);
        }

        let pruned = state.prune_ready();
        if pruned > 0 {
            debug!(count = pruned, "pruned stale ready entries");
        }

        Ok(report)
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError> {
        Ok(self.state.lock().await.counts())
    }
}

struct InMemoryLease {
    task: Task,
    token: LeaseToken,
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn task(&self) -> &Task {
        &self.task
    }

    fn token(&self) -> LeaseToken {
        self.token
    }

    async fn complete(self: Box<Self>, success: bool) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&self.task.id) else {
            return Err(StoreError::LeaseLost(self.task.id));
        };
        if !record.holds(self.token) {
            return Err(StoreError::LeaseLost(self.task.id));
        }
        record.finish(success, now);
        state.records.remove(&self.task.id);
        Ok(())
    }
}
