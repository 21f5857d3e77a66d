//! Results of retrieval attempts.
//!
//! A `TaskResult` is written exactly once, either by a worker after an
//! attempt or by the scheduler when no attempt is possible. It is never
//! mutated afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ResultId, TaskId};
use super::provider::SelfInfo;
use super::task::{Content, Module, Provider, Task};

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The provider has no peer id registered on chain.
    NoPeerId,
    /// The provider has no multiaddrs registered on chain.
    NoMultiaddrs,
    /// None of the provider's multiaddrs resolve to a public address.
    NoPublicAddress,
    /// No multiaddr usable by the HTTP module.
    NoHttpAddress,
    /// The attempt did not finish within the task timeout.
    Timeout,
    /// Connection refused, reset, DNS failure and the like.
    CannotConnect,
    /// The provider answered but did not serve the content.
    RetrievalFailure,
    /// The worker itself failed.
    Internal,
}

/// What happened during one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Time to first byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<u64>,
    pub duration_ms: u64,
    pub downloaded: u64,
    /// Bytes per second over the transfer phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl RetrievalResult {
    pub fn success(duration: Duration, ttfb: Option<Duration>, downloaded: u64) -> Self {
        let speed = (downloaded > 0 && !duration.is_zero())
            .then(|| downloaded as f64 / duration.as_secs_f64());
        Self {
            success: true,
            error_code: None,
            error_message: None,
            ttfb_ms: ttfb.map(|d| d.as_millis() as u64),
            duration_ms: duration.as_millis() as u64,
            downloaded,
            speed,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            error_message: Some(message.into()),
            ttfb_ms: None,
            duration_ms: 0,
            downloaded: 0,
            speed: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_code == Some(ErrorCode::Timeout)
    }
}

/// A result record with the task identity denormalized into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub requester: String,
    pub module: Module,
    pub provider: Provider,
    pub content: Content,
    pub retriever: SelfInfo,
    pub result: RetrievalResult,
    pub task_created_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(
        id: ResultId,
        task: &Task,
        retriever: SelfInfo,
        result: RetrievalResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id: task.id,
            requester: task.requester.clone(),
            module: task.module,
            provider: task.provider.clone(),
            content: task.content.clone(),
            retriever,
            result,
            task_created_at: task.created_at,
            created_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.success
    }
}
