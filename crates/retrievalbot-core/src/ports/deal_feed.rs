//! DealFeed port - source of the canonical market-deal snapshot.

use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncBufRead;

use crate::domain::ErrorKind;

/// Raw (still compressed) snapshot bytes.
pub type FeedBody = Pin<Box<dyn AsyncBufRead + Send>>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("feed returned status {0}")]
    Status(u16),

    #[error("feed i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::Request(e) if e.is_timeout() => ErrorKind::Timeout,
            _ => ErrorKind::Transient,
        }
    }
}

/// Each call opens a fresh stream from the start of the snapshot.
#[async_trait]
pub trait DealFeed: Send + Sync {
    async fn open(&self) -> Result<FeedBody, FeedError>;
}
