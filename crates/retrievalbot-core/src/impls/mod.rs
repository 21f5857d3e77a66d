//! Implementations of the ports.

pub mod feeds;
pub mod http_worker;
pub mod inmem_deals;
pub mod inmem_queue;
pub mod inmem_results;
pub mod ipinfo;
pub mod jsonl_results;
pub mod lotus;

pub use self::feeds::{DEFAULT_FEED_URL, FileDealFeed, HttpDealFeed, feed_from_url};
pub use self::http_worker::HttpWorker;
pub use self::inmem_deals::InMemoryDealStore;
pub use self::inmem_queue::{InMemoryTaskQueue, QueuePolicy};
pub use self::inmem_results::InMemoryResultStore;
pub use self::ipinfo::{DEFAULT_IPINFO_URL, IpInfoLookup};
pub use self::jsonl_results::JsonLinesResultStore;
pub use self::lotus::{DEFAULT_LOTUS_URL, LotusProviderLookup};
