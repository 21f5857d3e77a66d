#![allow(dead_code)]

use std::io::Cursor;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_compression::tokio::write::ZstdEncoder;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::AsyncWriteExt;

use retrievalbot_core::domain::{DealRecord, Location, LookupError, ProviderInfo, SelfInfo};
use retrievalbot_core::ports::{DealFeed, FeedBody, FeedError, FixedClock, LocationLookup, ProviderLookup};

/// Roughly epoch 3_500_000.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now()))
}

/// Far enough out that deals ending here are live at [`now`].
pub const ACTIVE_END: i64 = 5_000_000;

pub fn deal_json(provider: &str, client: &str, sector_start: i64, end: i64) -> String {
    format!(
        r#"{{"Proposal":{{"PieceCID":{{"/":"baga-{provider}-{end}"}},"PieceSize":34359738368,"VerifiedDeal":true,"Client":"{client}","Provider":"{provider}","Label":"","StartEpoch":{sector_start},"EndEpoch":{end},"StoragePricePerEpoch":"0"}},"State":{{"SectorStartEpoch":{sector_start},"LastUpdatedEpoch":-1,"SlashEpoch":-1}}}}"#
    )
}

pub fn snapshot(entries: &[(u64, String)]) -> String {
    let body: Vec<String> = entries
        .iter()
        .map(|(id, deal)| format!("\"{id}\":{deal}"))
        .collect();
    format!("{{{}}}", body.join(","))
}

pub async fn zstd(json: &str) -> Vec<u8> {
    let mut enc = ZstdEncoder::new(Vec::new());
    enc.write_all(json.as_bytes()).await.unwrap();
    enc.shutdown().await.unwrap();
    enc.into_inner()
}

/// Serves the same compressed bytes on every open.
pub struct BytesFeed {
    body: Vec<u8>,
    pub opens: AtomicUsize,
}

impl BytesFeed {
    pub async fn from_json(json: &str) -> Self {
        Self {
            body: zstd(json).await,
            opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DealFeed for BytesFeed {
    async fn open(&self) -> Result<FeedBody, FeedError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(Cursor::new(self.body.clone())))
    }
}

pub fn stored_deal(id: u64, provider: &str) -> DealRecord {
    DealRecord {
        deal_id: id,
        piece_cid: format!("baga{id}"),
        piece_size: 2048,
        label: String::new(),
        verified: true,
        client: "f0client".to_string(),
        provider: provider.to_string(),
        start: now() - chrono::Duration::days(30),
        expiration: now() + chrono::Duration::days(300),
    }
}

/// Chain lookup that registers every provider at a public address and
/// counts calls.
#[derive(Default)]
pub struct CountingChain {
    pub calls: AtomicUsize,
}

impl CountingChain {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderLookup for CountingChain {
    async fn provider_info(&self, id: &str) -> Result<ProviderInfo, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderInfo {
            id: id.to_string(),
            peer_id: "12D3KooWBPs7u3ZV2yVZv3ECBEbWQ6y7ZcmNbRUGXo6wWpykdFBo".to_string(),
            multiaddrs: vec!["/ip4/8.8.8.8/tcp/24001/http".to_string()],
        })
    }
}

#[derive(Default)]
pub struct CountingGeo {
    pub calls: AtomicUsize,
}

impl CountingGeo {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationLookup for CountingGeo {
    async fn locate(&self, ip: IpAddr) -> Result<Location, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Location {
            ip: ip.to_string(),
            country: "DE".to_string(),
            continent: "EU".to_string(),
        })
    }

    async fn locate_self(&self) -> Result<SelfInfo, LookupError> {
        Ok(SelfInfo {
            ip: "198.51.100.1".to_string(),
            country: "US".to_string(),
            continent: "NA".to_string(),
            asn: None,
            resolved_at: None,
        })
    }
}
