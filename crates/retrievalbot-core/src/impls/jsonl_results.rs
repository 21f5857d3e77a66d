//! JsonLinesResultStore - appends one JSON document per result to a file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{StoreError, TaskResult};
use crate::ports::ResultStore;

pub struct JsonLinesResultStore {
    path: PathBuf,
    // serializes appends so lines from concurrent workers never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultStore for JsonLinesResultStore {
    async fn insert_many(&self, results: Vec<TaskResult>) -> Result<(), StoreError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for result in &results {
            serde_json::to_writer(&mut buf, result)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Content, ErrorCode, Module, Provider, ResultId, RetrievalResult, SelfInfo, Task, TaskId,
    };
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    fn result() -> TaskResult {
        let task = Task {
            id: TaskId::from_ulid(Ulid::new()),
            requester: "filplus".to_string(),
            module: Module::Http,
            provider: Provider::default(),
            content: Content {
                cid: "bafy".to_string(),
            },
            timeout: Duration::from_secs(15),
            created_at: Utc::now(),
        };
        TaskResult::new(
            ResultId::from_ulid(Ulid::new()),
            &task,
            SelfInfo::default(),
            RetrievalResult::failure(ErrorCode::CannotConnect, "refused"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn appends_one_line_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesResultStore::new(dir.path().join("results.jsonl"));

        store.insert_many(vec![result(), result()]).await.unwrap();
        store.insert(result()).await.unwrap();

        let text = tokio::fs::read_to_string(store.path()).await.unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: TaskResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.result.error_code, Some(ErrorCode::CannotConnect));
    }
}
