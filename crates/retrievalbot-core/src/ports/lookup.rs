//! Upstream lookups behind the resolver: chain RPC and geo-IP.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::domain::{Location, LookupError, ProviderInfo, SelfInfo};

/// On-chain registration of a storage provider.
///
/// A provider that exists but registered no peer id or multiaddrs is a
/// successful lookup with empty fields, not an error.
#[async_trait]
pub trait ProviderLookup: Send + Sync {
    async fn provider_info(&self, provider_id: &str) -> Result<ProviderInfo, LookupError>;
}

#[async_trait]
pub trait LocationLookup: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<Location, LookupError>;

    /// Public address and location of the calling host.
    async fn locate_self(&self) -> Result<SelfInfo, LookupError>;
}
