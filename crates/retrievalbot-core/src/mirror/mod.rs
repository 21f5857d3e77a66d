//! DealMirror - keeps the local deal store in step with the remote market
//! snapshot.
//!
//! The snapshot is Zstandard-compressed JSON, decoded one entry at a time.
//! Memory stays at one insert batch plus the set of known deal ids no
//! matter how large the feed is.

pub mod entry;
pub mod stream;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_compression::tokio::bufread::ZstdDecoder;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use self::entry::FeedDeal;
pub use self::stream::{DecodeError, EntryStream};
use crate::domain::{DealId, DealRecord, ErrorKind, StoreError};
use crate::periodic;
use crate::ports::{Clock, DealFeed, DealStore, FeedError};

const DECODE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("snapshot decoding stopped after {inserted} inserted deals")]
    Decode {
        inserted: usize,
        #[source]
        source: DecodeError,
    },

    #[error("snapshot key '{0}' is not a deal id")]
    InvalidDealId(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MirrorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::Feed(e) => e.kind(),
            MirrorError::Decode { source, .. } => source.kind(),
            MirrorError::InvalidDealId(_) => ErrorKind::Malformed,
            MirrorError::Store(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Records per bulk insert.
    pub batch_size: usize,

    /// Provider and client ids to keep. Empty keeps everything.
    pub allow_list: HashSet<String>,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            allow_list: HashSet::new(),
        }
    }
}

/// What one refresh pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Ids already stored when the pass began.
    pub existing: usize,
    pub scanned: usize,
    pub inserted: usize,
    pub skipped_inactive: usize,
    pub skipped_expired: usize,
    pub skipped_existing: usize,
    pub skipped_filtered: usize,
    pub deleted: usize,
    /// Providers per client among the deals inserted in this pass.
    pub clients: BTreeMap<String, BTreeSet<String>>,
}

pub struct DealMirror {
    feed: Arc<dyn DealFeed>,
    store: Arc<dyn DealStore>,
    clock: Arc<dyn Clock>,
    settings: MirrorSettings,
}

impl DealMirror {
    pub fn new(
        feed: Arc<dyn DealFeed>,
        store: Arc<dyn DealStore>,
        clock: Arc<dyn Clock>,
        settings: MirrorSettings,
    ) -> Self {
        Self {
            feed,
            store,
            clock,
            settings,
        }
    }

    /// One synchronization pass.
    ///
    /// A feed that breaks off part way returns an error after keeping every
    /// batch that was already flushed; the next pass skips those ids.
    /// Expired records are only deleted after a complete pass.
    pub async fn refresh(&self) -> Result<RefreshReport, MirrorError> {
        let mut report = RefreshReport::default();
        let mut known = self.store.deal_ids().await?;
        report.existing = known.len();
        info!(count = known.len(), "loaded stored deal ids");

        let body = self.feed.open().await?;
        let mut decoder = ZstdDecoder::new(body);
        decoder.multiple_members(true);
        let mut entries = EntryStream::new(BufReader::with_capacity(DECODE_BUFFER, decoder));

        let now = self.clock.now();
        let batch_size = self.settings.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            let (key, deal) = match entries.next_entry::<FeedDeal>().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    self.flush(&mut batch, &mut report).await?;
                    warn!(
                        position = source.position(),
                        inserted = report.inserted,
                        error = %source,
                        "snapshot stream broke off"
                    );
                    return Err(MirrorError::Decode {
                        inserted: report.inserted,
                        source,
                    });
                }
            };
            report.scanned += 1;

            let Ok(deal_id) = key.parse::<DealId>() else {
                self.flush(&mut batch, &mut report).await?;
                return Err(MirrorError::InvalidDealId(key));
            };

            if !deal.is_activated() {
                report.skipped_inactive += 1;
                continue;
            }
            let expiration = deal.expiration();
            if expiration <= now || expiration <= deal.start() {
                report.skipped_expired += 1;
                continue;
            }
            if known.contains(&deal_id) {
                report.skipped_existing += 1;
                continue;
            }
            if !self.allowed(&deal) {
                report.skipped_filtered += 1;
                continue;
            }

            // a repeated key later in the same feed is skipped as existing
            known.insert(deal_id);
            report
                .clients
                .entry(deal.proposal.client.clone())
                .or_default()
                .insert(deal.proposal.provider.clone());
            batch.push(deal.into_record(deal_id));

            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut report).await?;
            }
        }
        self.flush(&mut batch, &mut report).await?;

        info!(
            scanned = report.scanned,
            inserted = report.inserted,
            "finished ingesting snapshot"
        );
        for (client, providers) in &report.clients {
            debug!(client = %client, providers = ?providers, "client providers");
        }

        report.deleted = self.store.delete_expired(self.clock.now()).await?;
        info!(count = report.deleted, "deleted expired deals");

        Ok(report)
    }

    fn allowed(&self, deal: &FeedDeal) -> bool {
        let allow = &self.settings.allow_list;
        allow.is_empty()
            || allow.contains(&deal.proposal.provider)
            || allow.contains(&deal.proposal.client)
    }

    async fn flush(
        &self,
        batch: &mut Vec<DealRecord>,
        report: &mut RefreshReport,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = std::mem::replace(batch, Vec::with_capacity(self.settings.batch_size));
        let written = self.store.insert_many(records).await?;
        report.inserted += written;
        info!(count = written, total = report.inserted, "inserted deal batch");
        Ok(())
    }

    /// Refresh every `interval` until shutdown. Failed passes are logged
    /// and retried on the next tick.
    pub async fn run(&self, interval: Duration, shutdown: watch::Receiver<bool>) {
        periodic::every("deal-mirror", interval, shutdown, || async {
            match self.refresh().await {
                Ok(report) => info!(
                    inserted = report.inserted,
                    deleted = report.deleted,
                    "deal mirror refresh complete"
                ),
                Err(e) => warn!(error = %e, kind = ?e.kind(), "deal mirror refresh failed"),
            }
        })
        .await;
    }
}
