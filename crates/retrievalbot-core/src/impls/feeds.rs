//! DealFeed implementations: remote snapshot over HTTP, local snapshot file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::BufReader;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::ports::{DealFeed, FeedBody, FeedError};

pub const DEFAULT_FEED_URL: &str = "https://marketdeals.s3.amazonaws.com/StateMarketDeals.json.zst";

/// Streams the snapshot body chunk by chunk; nothing is buffered beyond
/// what the decoder asks for.
pub struct HttpDealFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpDealFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DealFeed for HttpDealFeed {
    async fn open(&self) -> Result<FeedBody, FeedError> {
        info!(url = %self.url, "fetching market deal snapshot");
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(FeedError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

/// A snapshot already downloaded to disk.
pub struct FileDealFeed {
    path: PathBuf,
}

impl FileDealFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DealFeed for FileDealFeed {
    async fn open(&self) -> Result<FeedBody, FeedError> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(BufReader::new(file)))
    }
}

/// Pick a feed implementation from a URL; `file://` and bare paths read
/// from disk.
pub fn feed_from_url(url: &str) -> Result<Box<dyn DealFeed>, FeedError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(FileDealFeed::new(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(HttpDealFeed::new(url)?));
    }
    Ok(Box::new(FileDealFeed::new(url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::impls::InMemoryDealStore;
    use crate::mirror::{DealMirror, MirrorError, MirrorSettings};
    use crate::ports::{DealStore, FixedClock};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single request with `response`, then close.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/StateMarketDeals.json.zst")
    }

    #[tokio::test]
    async fn unavailable_snapshot_is_a_transient_status_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let feed = HttpDealFeed::new(url).unwrap();
        let err = match feed.open().await {
            Ok(_) => panic!("503 must not open a body"),
            Err(e) => e,
        };
        assert!(matches!(err, FeedError::Status(503)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_store_untouched() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let store = Arc::new(InMemoryDealStore::new());
        let mirror = DealMirror::new(
            Arc::new(HttpDealFeed::new(url).unwrap()),
            store.clone(),
            Arc::new(FixedClock::new(chrono::Utc::now())),
            MirrorSettings::default(),
        );

        let err = mirror.refresh().await.unwrap_err();
        assert!(matches!(err, MirrorError::Feed(FeedError::Status(503))), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_body_streams_through() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}").await;
        let mut body = HttpDealFeed::new(url).unwrap().open().await.unwrap();
        let mut text = String::new();
        body.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "{}");
    }
}
