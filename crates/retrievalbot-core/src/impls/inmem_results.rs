//! InMemoryResultStore - append-only Vec of results.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, TaskResult};
use crate::ports::ResultStore;

#[derive(Default)]
pub struct InMemoryResultStore {
    results: Mutex<Vec<TaskResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<TaskResult> {
        self.results.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn insert_many(&self, results: Vec<TaskResult>) -> Result<(), StoreError> {
        self.results.lock().await.extend(results);
        Ok(())
    }
}
