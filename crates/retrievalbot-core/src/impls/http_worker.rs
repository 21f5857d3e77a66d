//! HTTP piece retrieval: fetch the first MiB of a piece from the provider's
//! HTTP endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use tracing::debug;

use crate::domain::{ErrorCode, Module, RetrievalResult, Task};
use crate::ports::ProtocolWorker;
use crate::resolver::Multiaddr;

/// Bytes requested per attempt.
pub const RANGE_LEN: u64 = 1 << 20;

pub struct HttpWorker {
    client: reqwest::Client,
}

impl HttpWorker {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Base URL for the first multiaddr that names an HTTP endpoint, falling
/// back to the first plain host/tcp pair.
pub fn base_url(multiaddrs: &[String]) -> Option<String> {
    let parsed: Vec<Multiaddr> = multiaddrs.iter().filter_map(|m| m.parse().ok()).collect();
    let usable = |addr: &&Multiaddr| addr.host().is_some() && addr.tcp_port().is_some();

    let explicit = parsed
        .iter()
        .filter(usable)
        .find(|a| a.http_scheme().is_some());
    let addr = explicit.or_else(|| parsed.iter().find(usable))?;

    let scheme = addr.http_scheme().unwrap_or("http");
    Some(format!("{scheme}://{}:{}", addr.host()?, addr.tcp_port()?))
}

fn classify(err: &reqwest::Error) -> ErrorCode {
    if err.is_timeout() {
        ErrorCode::Timeout
    } else if err.is_connect() {
        ErrorCode::CannotConnect
    } else {
        ErrorCode::RetrievalFailure
    }
}

#[async_trait]
impl ProtocolWorker for HttpWorker {
    fn module(&self) -> Module {
        Module::Http
    }

    async fn attempt(&self, task: &Task) -> RetrievalResult {
        let Some(base) = base_url(&task.provider.multiaddrs) else {
            return RetrievalResult::failure(
                ErrorCode::NoHttpAddress,
                format!("provider {} has no usable http multiaddr", task.provider.id),
            );
        };
        let url = format!("{base}/piece/{}", task.content.cid);
        debug!(task_id = %task.id, %url, "http retrieval");

        let started = Instant::now();
        let resp = match self
            .client
            .get(&url)
            .header(RANGE, format!("bytes=0-{}", RANGE_LEN - 1))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return RetrievalResult::failure(classify(&e), e.to_string())
                    .with_duration(started.elapsed());
            }
        };
        let ttfb = started.elapsed();

        let status = resp.status();
        if !status.is_success() {
            return RetrievalResult::failure(
                ErrorCode::RetrievalFailure,
                format!("unexpected status {status}"),
            )
            .with_duration(started.elapsed());
        }

        let mut downloaded = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    downloaded += bytes.len() as u64;
                    if downloaded >= RANGE_LEN {
                        break;
                    }
                }
                Err(e) => {
                    let mut result = RetrievalResult::failure(classify(&e), e.to_string())
                        .with_duration(started.elapsed());
                    result.downloaded = downloaded;
                    return result;
                }
            }
        }

        RetrievalResult::success(started.elapsed(), Some(ttfb), downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Content, Provider, TaskId};
    use chrono::Utc;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use ulid::Ulid;

    #[rstest]
    #[case(&["/ip4/1.2.3.4/tcp/80/http"], Some("http://1.2.3.4:80"))]
    #[case(&["/ip4/1.2.3.4/tcp/24001", "/dns/sp.example/tcp/443/https"], Some("https://sp.example:443"))]
    #[case(&["/ip4/1.2.3.4/tcp/24001"], Some("http://1.2.3.4:24001"))]
    #[case(&["/ip6/::1/tcp/8080/http"], Some("http://[::1]:8080"))]
    #[case(&["/ip4/1.2.3.4/udp/1/quic-v1", "garbage"], None)]
    #[case(&[], None)]
    fn picks_base_url(#[case] addrs: &[&str], #[case] expected: Option<&str>) {
        let addrs: Vec<String> = addrs.iter().map(|s| s.to_string()).collect();
        assert_eq!(base_url(&addrs).as_deref(), expected);
    }

    fn task(multiaddrs: Vec<String>) -> Task {
        Task {
            id: TaskId::from_ulid(Ulid::new()),
            requester: "filplus".to_string(),
            module: Module::Http,
            provider: Provider {
                id: "f01000".to_string(),
                multiaddrs,
                ..Provider::default()
            },
            content: Content {
                cid: "baga6ea4seaq".to_string(),
            },
            timeout: Duration::from_secs(5),
            created_at: Utc::now(),
        }
    }

    fn worker() -> HttpWorker {
        HttpWorker::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    /// One-shot HTTP server answering with a fixed response.
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
        format!("/ip4/127.0.0.1/tcp/{}/http", addr.port())
    }

    #[tokio::test]
    async fn partial_content_is_success() {
        let addr = serve_once(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let result = worker().attempt(&task(vec![addr])).await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.downloaded, 5);
        assert!(result.ttfb_ms.is_some());
    }

    #[tokio::test]
    async fn not_found_is_retrieval_failure() {
        let addr = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let result = worker().attempt(&task(vec![addr])).await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::RetrievalFailure));
    }

    #[tokio::test]
    async fn refused_connection_is_cannot_connect() {
        // bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr = format!("/ip4/127.0.0.1/tcp/{port}/http");
        let result = worker().attempt(&task(vec![addr])).await;
        assert_eq!(result.error_code, Some(ErrorCode::CannotConnect));
    }

    #[tokio::test]
    async fn no_address_is_reported() {
        let result = worker().attempt(&task(vec![])).await;
        assert_eq!(result.error_code, Some(ErrorCode::NoHttpAddress));
    }
}
