//! Standalone worker runs against a static provider list.
//!
//! The descriptor is TOML in one of two shapes. The legacy shape names one
//! provider at the top level:
//!
//! ```toml
//! ID = "f01000"
//! PeerID = "12D3KooW..."
//! Multiaddrs = ["/ip4/1.2.3.4/tcp/80/http"]
//! Pieces = ["baga..."]
//! ```
//!
//! The list shape has optional `[Common]` defaults and `[[Providers]]`
//! entries that fall back to them field by field.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{Content, Module, Provider, RetrievalResult, Task};
use crate::ports::{IdGenerator, ProtocolWorker, bounded_attempt};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Requester tag on probe tasks.
pub const PROBE_REQUESTER: &str = "probe";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("cannot read descriptor {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid descriptor: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    #[serde(rename = "Multiaddrs")]
    pub multiaddrs: Vec<String>,
    #[serde(rename = "Pieces")]
    pub pieces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommonEntry {
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    #[serde(rename = "Multiaddrs")]
    pub multiaddrs: Vec<String>,
    #[serde(rename = "Pieces")]
    pub pieces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerDescriptor {
    #[serde(rename = "Common")]
    pub common: CommonEntry,
    #[serde(rename = "Providers")]
    pub providers: Vec<ProviderEntry>,
}

impl WorkerDescriptor {
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        if let Ok(legacy) = toml::from_str::<ProviderEntry>(text)
            && !legacy.id.is_empty()
        {
            return Ok(Self {
                common: CommonEntry::default(),
                providers: vec![legacy],
            });
        }
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DescriptorError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&text)
    }

    /// One task per (provider, piece). Entries without an id, and entries
    /// left with no pieces after applying the defaults, produce nothing.
    pub fn to_tasks(
        &self,
        module: Module,
        ids: &dyn IdGenerator,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<Task> {
        let mut tasks = Vec::new();
        for entry in &self.providers {
            if entry.id.is_empty() {
                continue;
            }
            let peer_id = if entry.peer_id.is_empty() {
                &self.common.peer_id
            } else {
                &entry.peer_id
            };
            let multiaddrs = if entry.multiaddrs.is_empty() {
                &self.common.multiaddrs
            } else {
                &entry.multiaddrs
            };
            let pieces = if entry.pieces.is_empty() {
                &self.common.pieces
            } else {
                &entry.pieces
            };

            for piece in pieces.iter().filter(|p| !p.is_empty()) {
                tasks.push(Task {
                    id: ids.task_id(),
                    requester: PROBE_REQUESTER.to_string(),
                    module,
                    provider: Provider {
                        id: entry.id.clone(),
                        peer_id: peer_id.clone(),
                        multiaddrs: multiaddrs.clone(),
                        ..Provider::default()
                    },
                    content: Content { cid: piece.clone() },
                    timeout,
                    created_at: now,
                });
            }
        }
        tasks
    }
}

/// Run each task once, in order, bounded by its timeout.
pub async fn run_probe(worker: &dyn ProtocolWorker, tasks: Vec<Task>) -> Vec<(Task, RetrievalResult)> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        let result = bounded_attempt(worker, &task).await;
        out.push((task, result));
    }
    out
}

/// Operator-facing line for one attempt.
pub fn describe(task: &Task, result: &RetrievalResult, verbose: bool) -> String {
    let head = format!("provider {} retrieval {}", task.provider.id, task.content.cid);
    if result.success {
        if verbose {
            format!("{head} success: {result:?}")
        } else {
            format!("{head} success")
        }
    } else {
        let detail = match (&result.error_code, &result.error_message) {
            (Some(code), Some(msg)) => format!("{code:?}: {msg}"),
            (Some(code), None) => format!("{code:?}"),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "unknown error".to_string(),
        };
        if verbose {
            format!("{head} failed: {detail} ({result:?})")
        } else {
            format!("{head} failed: {detail}")
        }
    }
}
