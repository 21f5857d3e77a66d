//! TTL cache with single-flight misses.
//!
//! Each key owns a slot behind its own async mutex. A miss holds the slot
//! lock across the upstream call, so concurrent callers for the same key
//! queue behind it and find the fresh value once it lands. Failures leave
//! the slot empty: the next caller tries upstream again.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::ports::Clock;

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

pub struct TtlCache<K, V> {
    slots: DashMap<K, Slot<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        (now - entry.inserted_at)
            .to_std()
            .map(|age| age < self.ttl)
            // inserted "in the future" after a clock step back
            .unwrap_or(true)
    }

    /// Cached value for `key`, or the result of `fetch` on a miss.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // clone the Arc out so the shard lock is released before awaiting
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_ref()
            && self.is_fresh(entry, self.clock.now())
        {
            return Ok(entry.value.clone());
        }

        let value = fetch().await?;
        *guard = Some(Entry {
            value: value.clone(),
            inserted_at: self.clock.now(),
        });
        Ok(value)
    }

    /// Drop expired and empty slots that nobody is waiting on.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|e| self.is_fresh(e, now)),
            Err(_) => true,
        });
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
