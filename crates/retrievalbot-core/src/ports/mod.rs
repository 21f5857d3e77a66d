//! Ports - the seams to external systems.
//!
//! Every store, upstream service and protocol implementation sits behind
//! one of these traits. Components receive them as `Arc<dyn ...>` at
//! construction and never reach for globals, so each can be tested
//! against in-memory substitutes.

pub mod clock;
pub mod deal_feed;
pub mod deal_store;
pub mod id_generator;
pub mod lookup;
pub mod result_store;
pub mod task_queue;
pub mod worker;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::deal_feed::{DealFeed, FeedBody, FeedError};
pub use self::deal_store::DealStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lookup::{LocationLookup, ProviderLookup};
pub use self::result_store::ResultStore;
pub use self::task_queue::{QueueCounts, StateCounts, SweepReport, TaskLease, TaskQueue};
pub use self::worker::{ProtocolWorker, bounded_attempt};
