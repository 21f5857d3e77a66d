//! ReaperLoop - returns expired leases to the queue and drops stale tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::StoreError;
use crate::periodic;
use crate::ports::{Clock, SweepReport, TaskQueue};

pub struct ReaperLoop {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl ReaperLoop {
    pub fn new(queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let report = self.queue.sweep(self.clock.now()).await?;
        if report.requeued > 0 || report.expired > 0 {
            info!(
                requeued = report.requeued,
                expired = report.expired,
                "reclaimed tasks"
            );
        }
        let counts = self.queue.counts_by_state().await?;
        for (requester, c) in &counts.by_requester {
            debug!(%requester, queued = c.queued, leased = c.leased, "queue depth");
        }
        Ok(report)
    }

    pub async fn run(&self, interval: Duration, shutdown: watch::Receiver<bool>) {
        periodic::every("reaper", interval, shutdown, || async {
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "lease sweep failed");
            }
        })
        .await;
    }
}
