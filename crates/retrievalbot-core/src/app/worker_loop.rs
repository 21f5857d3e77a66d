//! WorkerLoop - lease, attempt, record, retire.
//!
//! The three steps are not one transaction. A result that cannot be
//! written leaves the lease in place, so the reaper re-queues the task once
//! the lease runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::WorkerRegistry;
use crate::domain::{Module, SelfInfo, StoreError, TaskResult};
use crate::ports::{Clock, IdGenerator, ProtocolWorker, ResultStore, TaskQueue, bounded_attempt};

/// Shared handles every worker loop needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn TaskQueue>,
    pub results: Arc<dyn ResultStore>,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
    /// Identity written into every result.
    pub retriever: SelfInfo,
    /// Sleep between polls of an empty queue.
    pub idle_poll: Duration,
}

pub struct WorkerLoop {
    worker: Arc<dyn ProtocolWorker>,
    ctx: WorkerContext,
}

impl WorkerLoop {
    pub fn new(worker: Arc<dyn ProtocolWorker>, ctx: WorkerContext) -> Self {
        Self { worker, ctx }
    }

    pub fn module(&self) -> Module {
        self.worker.module()
    }

    /// Process at most one task. `None` when the queue has nothing for this
    /// module.
    pub async fn run_one(&self) -> Result<Option<TaskResult>, StoreError> {
        let Some(lease) = self.ctx.queue.lease(self.module()).await? else {
            return Ok(None);
        };
        let task = lease.task().clone();
        debug!(
            task_id = %task.id,
            module = %task.module,
            provider = %task.provider.id,
            lease = ?lease.token(),
            "task leased"
        );

        let attempt = bounded_attempt(self.worker.as_ref(), &task).await;
        let result = TaskResult::new(
            self.ctx.ids.result_id(),
            &task,
            self.ctx.retriever.clone(),
            attempt,
            self.ctx.clock.now(),
        );

        self.ctx.results.insert(result.clone()).await?;
        match lease.complete(result.is_success()).await {
            Ok(()) => {}
            // the result is already recorded; a re-leased copy will add another
            Err(StoreError::LeaseLost(id)) => {
                warn!(task_id = %id, "lease expired before completion");
            }
            Err(e) => return Err(e),
        }
        Ok(Some(result))
    }

    /// Loop until shutdown. An attempt in flight is finished, not cancelled.
    pub async fn run(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        let module = self.module();
        info!(worker_id, %module, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_one().await {
                Ok(Some(result)) => {
                    info!(
                        worker_id,
                        task_id = %result.task_id,
                        provider = %result.provider.id,
                        success = result.result.success,
                        error_code = ?result.result.error_code,
                        "attempt recorded"
                    );
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(worker_id, %module, error = %e, "worker step failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.ctx.idle_poll) => {}
                }
            }
        }
        info!(worker_id, %module, "worker stopped");
    }
}

/// Worker group handle.
/// - dropping or signalling `shutdown_tx` stops every worker
/// - `shutdown_and_join()` waits for them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `concurrency(module)` loops for every registered worker.
    pub fn spawn(
        registry: &WorkerRegistry,
        ctx: WorkerContext,
        concurrency: impl Fn(Module) -> usize,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::new();
        let mut worker_id = 0;

        for module in registry.modules() {
            let Some(worker) = registry.get(module) else {
                continue;
            };
            let looped = Arc::new(WorkerLoop::new(Arc::clone(worker), ctx.clone()));
            for _ in 0..concurrency(module) {
                let looped = Arc::clone(&looped);
                let rx = shutdown_rx.clone();
                let id = worker_id;
                joins.push(tokio::spawn(async move { looped.run(id, rx).await }));
                worker_id += 1;
            }
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}
