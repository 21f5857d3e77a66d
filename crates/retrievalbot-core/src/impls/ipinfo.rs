//! LocationLookup backed by the ipinfo.io lite API.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{Location, LookupError, SelfInfo};
use crate::ports::LocationLookup;

pub const DEFAULT_IPINFO_URL: &str = "https://api.ipinfo.io/lite";

#[derive(Debug, Default, Deserialize)]
struct LiteResponse {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    asn: Option<String>,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    continent_code: String,
}

pub struct IpInfoLookup {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoLookup {
    pub fn new(token: Option<String>) -> Result<Self, LookupError> {
        Self::with_base_url(DEFAULT_IPINFO_URL, token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    async fn fetch(&self, path: &str) -> Result<LiteResponse, LookupError> {
        let mut request = self.client.get(format!("{}/{path}", self.base_url));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status().as_u16()));
        }
        let body: LiteResponse = resp.json().await?;
        if body.country_code.is_empty() {
            return Err(LookupError::Malformed(format!("no country for {path}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl LocationLookup for IpInfoLookup {
    async fn locate(&self, ip: IpAddr) -> Result<Location, LookupError> {
        let body = self.fetch(&ip.to_string()).await?;
        Ok(Location {
            ip: ip.to_string(),
            country: body.country_code,
            continent: body.continent_code,
        })
    }

    async fn locate_self(&self) -> Result<SelfInfo, LookupError> {
        let body = self.fetch("me").await?;
        Ok(SelfInfo {
            ip: body.ip,
            country: body.country_code,
            continent: body.continent_code,
            asn: body.asn,
            resolved_at: None,
        })
    }
}
