//! ResultStore port - append-only record of retrieval results.

use async_trait::async_trait;

use crate::domain::{StoreError, TaskResult};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Durably append results. Records are never updated afterwards.
    async fn insert_many(&self, results: Vec<TaskResult>) -> Result<(), StoreError>;

    async fn insert(&self, result: TaskResult) -> Result<(), StoreError> {
        self.insert_many(vec![result]).await
    }
}
