//! InMemoryDealStore - BTreeMap-backed deal mirror.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use tokio::sync::RwLock;

use crate::domain::{DealId, DealRecord, StoreError};
use crate::ports::DealStore;

pub struct InMemoryDealStore {
    deals: RwLock<BTreeMap<DealId, DealRecord>>,
    rng: Mutex<StdRng>,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic sampling, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            deals: RwLock::new(BTreeMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub async fn get(&self, deal_id: DealId) -> Option<DealRecord> {
        self.deals.read().await.get(&deal_id).cloned()
    }

    pub async fn all(&self) -> Vec<DealRecord> {
        self.deals.read().await.values().cloned().collect()
    }
}

impl Default for InMemoryDealStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DealStore for InMemoryDealStore {
    async fn deal_ids(&self) -> Result<HashSet<DealId>, StoreError> {
        Ok(self.deals.read().await.keys().copied().collect())
    }

    async fn insert_many(&self, deals: Vec<DealRecord>) -> Result<usize, StoreError> {
        let mut map = self.deals.write().await;
        let n = deals.len();
        for deal in deals {
            map.insert(deal.deal_id, deal);
        }
        Ok(n)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut map = self.deals.write().await;
        let before = map.len();
        map.retain(|_, deal| !deal.is_expired_at(now));
        Ok(before - map.len())
    }

    async fn sample_active_verified(
        &self,
        size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, StoreError> {
        let map = self.deals.read().await;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let sample = map
            .values()
            .filter(|deal| deal.verified && !deal.is_expired_at(now))
            .choose_multiple(&mut *rng, size);
        Ok(sample.into_iter().cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.deals.read().await.len())
    }
}
