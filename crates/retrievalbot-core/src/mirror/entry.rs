//! Shape of one value in the market-deal snapshot.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{DealId, DealRecord, epoch_to_time};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedDeal {
    pub proposal: Proposal,
    pub state: DealState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CidLink {
    #[serde(rename = "/")]
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Proposal {
    #[serde(rename = "PieceCID")]
    pub piece_cid: CidLink,
    pub piece_size: u64,
    pub verified_deal: bool,
    pub client: String,
    pub provider: String,
    #[serde(default)]
    pub label: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealState {
    pub sector_start_epoch: i64,
    #[serde(default)]
    pub last_updated_epoch: i64,
    #[serde(default)]
    pub slash_epoch: i64,
}

impl FeedDeal {
    /// Sealed into a sector on chain.
    pub fn is_activated(&self) -> bool {
        self.state.sector_start_epoch > 0
    }

    pub fn start(&self) -> DateTime<Utc> {
        epoch_to_time(self.state.sector_start_epoch)
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        epoch_to_time(self.proposal.end_epoch)
    }

    pub fn into_record(self, deal_id: DealId) -> DealRecord {
        let (start, expiration) = (self.start(), self.expiration());
        let p = self.proposal;
        DealRecord {
            deal_id,
            piece_cid: p.piece_cid.cid,
            piece_size: p.piece_size,
            label: p.label,
            verified: p.verified_deal,
            client: p.client,
            provider: p.provider,
            start,
            expiration,
        }
    }
}
