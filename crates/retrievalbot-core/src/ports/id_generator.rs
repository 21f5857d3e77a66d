//! IdGenerator port.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{ResultId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn result_id(&self) -> ResultId;
}

/// ULID generator whose timestamp component comes from a [`Clock`], so ids
/// minted under a `FixedClock` sort by the pinned time.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn result_id(&self) -> ResultId {
        ResultId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));
        assert_ne!(ids.task_id(), ids.task_id());
    }

    #[test]
    fn timestamp_follows_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(Arc::new(FixedClock::new(fixed)));

        let a = ids.task_id();
        let b = ids.result_id();

        // random part differs, timestamp part is pinned
        assert_ne!(a.as_ulid(), b.as_ulid());
        assert_eq!(a.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
    }
}
