//! ProtocolWorker port - one retrieval attempt per task.

use std::time::Instant;

use async_trait::async_trait;

use crate::domain::{ErrorCode, Module, RetrievalResult, Task};

/// A retrieval protocol implementation.
///
/// `attempt` reports protocol failures through the returned
/// [`RetrievalResult`]; it has no error channel of its own.
#[async_trait]
pub trait ProtocolWorker: Send + Sync {
    fn module(&self) -> Module;

    async fn attempt(&self, task: &Task) -> RetrievalResult;
}

/// Run `attempt` bounded by `task.timeout`.
///
/// On expiry the attempt future is dropped and a timeout failure is
/// returned, so the caller regains control right at the deadline.
pub async fn bounded_attempt(worker: &dyn ProtocolWorker, task: &Task) -> RetrievalResult {
    let started = Instant::now();
    match tokio::time::timeout(task.timeout, worker.attempt(task)).await {
        Ok(result) => result,
        Err(_) => RetrievalResult::failure(
            ErrorCode::Timeout,
            format!("retrieval did not finish within {:?}", task.timeout),
        )
        .with_duration(started.elapsed()),
    }
}
