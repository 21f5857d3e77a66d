//! Network identity and geography of storage providers and of this process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chain-registered network identity of a storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub peer_id: String,
    /// Text-form multiaddrs (`/ip4/1.2.3.4/tcp/24001`).
    pub multiaddrs: Vec<String>,
}

/// Geographic location of a network address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub ip: String,
    /// ISO 3166-1 alpha-2 code.
    pub country: String,
    /// Two-letter continent code (`EU`, `NA`, `AS`, ...).
    pub continent: String,
}

/// This process's own public identity, resolved once at startup and
/// attached to every result it writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfInfo {
    pub ip: String,
    pub country: String,
    pub continent: String,
    pub asn: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}
