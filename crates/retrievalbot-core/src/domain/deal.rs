//! Storage deals mirrored from the chain's market state.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp of mainnet epoch 0.
pub const GENESIS_UNIX_SECS: i64 = 1_598_306_400;

/// Wall-clock length of one epoch.
pub const EPOCH_SECS: i64 = 30;

/// Chain epoch → wall-clock time.
pub fn epoch_to_time(epoch: i64) -> DateTime<Utc> {
    let secs = GENESIS_UNIX_SECS.saturating_add(epoch.saturating_mul(EPOCH_SECS));
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub type DealId = u64;

/// One deal as stored locally.
///
/// A record exists in the store iff the deal has activated and has not yet
/// expired; `expiration > start` holds for every record the mirror writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRecord {
    pub deal_id: DealId,
    pub piece_cid: String,
    pub piece_size: u64,
    pub label: String,
    pub verified: bool,
    pub client: String,
    pub provider: String,
    pub start: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
}

impl DealRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    /// Content to retrieve for this deal.
    ///
    /// Clients commonly put the payload root CID in the label; when the
    /// label looks like a CID it is used, otherwise the piece CID.
    pub fn content_cid(&self) -> &str {
        if looks_like_cid(&self.label) {
            &self.label
        } else {
            &self.piece_cid
        }
    }
}

fn looks_like_cid(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with("Qm") && s.len() == 46) || (s.starts_with("baf") && s.len() > 50)
}
