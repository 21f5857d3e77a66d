//! DealStore port - the local mirror of on-chain market deals.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DealId, DealRecord, StoreError};

/// Ordered, queryable collection of [`DealRecord`]s keyed by deal id.
///
/// The mirror is the only writer. The scheduler only samples.
#[async_trait]
pub trait DealStore: Send + Sync {
    /// Ids of every stored deal. Used as an existence set, so
    /// implementations should avoid loading full records.
    async fn deal_ids(&self) -> Result<HashSet<DealId>, StoreError>;

    /// Bulk insert. Returns how many records were written.
    async fn insert_many(&self, deals: Vec<DealRecord>) -> Result<usize, StoreError>;

    /// Delete every record with `expiration <= now` in one pass.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Uniform random sample of up to `size` verified deals that are still
    /// active at `now`.
    async fn sample_active_verified(
        &self,
        size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
