//! ProviderLookup over a Lotus JSON-RPC endpoint (`Filecoin.StateMinerInfo`).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::domain::{LookupError, ProviderInfo};
use crate::ports::ProviderLookup;
use crate::resolver::Multiaddr;

pub const DEFAULT_LOTUS_URL: &str = "https://api.node.glif.io/rpc/v0";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinerInfo {
    peer_id: Option<String>,
    /// Base64 of the binary multiaddr encoding.
    multiaddrs: Option<Vec<String>>,
}

pub struct LotusProviderLookup {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl LotusProviderLookup {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
        })
    }
}

/// Decode the registered addresses, dropping the ones that fail. A non-empty
/// registration with nothing decodable is an error rather than "no addresses".
fn decode_multiaddrs(provider_id: &str, encoded: Vec<String>) -> Result<Vec<String>, LookupError> {
    let registered = encoded.len();
    let decoded: Vec<String> = encoded
        .into_iter()
        .filter_map(|b64| {
            let bytes = match STANDARD.decode(&b64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(provider = provider_id, error = %e, "multiaddr is not base64");
                    return None;
                }
            };
            match Multiaddr::from_bytes(&bytes) {
                Ok(addr) => Some(addr.to_string()),
                Err(e) => {
                    debug!(provider = provider_id, error = %e, "dropping undecodable multiaddr");
                    None
                }
            }
        })
        .collect();
    if registered > 0 && decoded.is_empty() {
        return Err(LookupError::Malformed(format!(
            "none of {registered} multiaddrs for {provider_id} decodes"
        )));
    }
    Ok(decoded)
}

#[async_trait]
impl ProviderLookup for LotusProviderLookup {
    async fn provider_info(&self, provider_id: &str) -> Result<ProviderInfo, LookupError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "Filecoin.StateMinerInfo",
            "params": [provider_id, null],
            "id": 1,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status().as_u16()));
        }
        let rpc: RpcResponse<MinerInfo> = resp.json().await?;
        if let Some(err) = rpc.error {
            return Err(LookupError::Upstream(format!("rpc error {}: {}", err.code, err.message)));
        }
        let info = rpc
            .result
            .ok_or_else(|| LookupError::Malformed("rpc response has no result".to_string()))?;

        Ok(ProviderInfo {
            id: provider_id.to_string(),
            peer_id: info.peer_id.unwrap_or_default(),
            multiaddrs: decode_multiaddrs(provider_id, info.multiaddrs.unwrap_or_default())?,
        })
    }
}
