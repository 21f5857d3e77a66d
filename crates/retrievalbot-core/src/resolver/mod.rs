//! Resolver - provider id to reachable, located retrieval target.
//!
//! Chain lookups and geo-IP lookups are each cached per key with their own
//! TTL. The process's own identity is looked up once at construction.

pub mod cache;
pub mod multiaddr;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

pub use self::cache::TtlCache;
pub use self::multiaddr::{Host, Multiaddr, MultiaddrError, is_public};
use crate::domain::{Location, Provider, ProviderInfo, ResolveError, SelfInfo};
use crate::ports::{Clock, LocationLookup, ProviderLookup};

#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub provider_ttl: Duration,
    pub location_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            provider_ttl: Duration::from_secs(24 * 60 * 60),
            location_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct Resolver {
    providers: TtlCache<String, ProviderInfo>,
    locations: TtlCache<IpAddr, Location>,
    provider_lookup: Arc<dyn ProviderLookup>,
    location_lookup: Arc<dyn LocationLookup>,
    self_info: SelfInfo,
}

impl Resolver {
    /// Build a resolver, looking up this host's public identity first.
    /// Failing that lookup is a startup failure.
    pub async fn new(
        provider_lookup: Arc<dyn ProviderLookup>,
        location_lookup: Arc<dyn LocationLookup>,
        clock: Arc<dyn Clock>,
        settings: ResolverSettings,
    ) -> Result<Self, ResolveError> {
        let mut self_info = location_lookup
            .locate_self()
            .await
            .map_err(|source| ResolveError::LocationLookup {
                address: "self".to_string(),
                source,
            })?;
        self_info.resolved_at.get_or_insert_with(|| clock.now());
        info!(
            ip = %self_info.ip,
            country = %self_info.country,
            continent = %self_info.continent,
            "public ip info retrieved"
        );
        Ok(Self::with_self_info(
            provider_lookup,
            location_lookup,
            clock,
            settings,
            self_info,
        ))
    }

    pub fn with_self_info(
        provider_lookup: Arc<dyn ProviderLookup>,
        location_lookup: Arc<dyn LocationLookup>,
        clock: Arc<dyn Clock>,
        settings: ResolverSettings,
        self_info: SelfInfo,
    ) -> Self {
        Self {
            providers: TtlCache::new(settings.provider_ttl, Arc::clone(&clock)),
            locations: TtlCache::new(settings.location_ttl, clock),
            provider_lookup,
            location_lookup,
            self_info,
        }
    }

    pub fn self_info(&self) -> &SelfInfo {
        &self.self_info
    }

    /// Chain registration of `id`. Concurrent misses share one lookup.
    pub async fn resolve_provider(&self, id: &str) -> Result<ProviderInfo, ResolveError> {
        self.providers
            .get_or_try_fetch(&id.to_string(), move || async move {
                debug!(provider = id, "looking up provider on chain");
                self.provider_lookup.provider_info(id).await
            })
            .await
            .map_err(|source| ResolveError::ProviderLookup {
                id: id.to_string(),
                source,
            })
    }

    pub async fn resolve_location(&self, ip: IpAddr) -> Result<Location, ResolveError> {
        self.locations
            .get_or_try_fetch(&ip, move || async move {
                debug!(%ip, "looking up location");
                self.location_lookup.locate(ip).await
            })
            .await
            .map_err(|source| ResolveError::LocationLookup {
                address: ip.to_string(),
                source,
            })
    }

    /// Full retrieval target for a provider: chain identity plus the
    /// location of its first public address.
    pub async fn resolve_task_provider(&self, id: &str) -> Result<Provider, ResolveError> {
        let info = self.resolve_provider(id).await?;
        if info.peer_id.is_empty() {
            return Err(ResolveError::NoPeerId(id.to_string()));
        }
        if info.multiaddrs.is_empty() {
            return Err(ResolveError::NoMultiaddrs(id.to_string()));
        }

        let addrs: Vec<Multiaddr> = info
            .multiaddrs
            .iter()
            .filter_map(|text| match text.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    debug!(provider = id, multiaddr = %text, error = %e, "skipping unparseable multiaddr");
                    None
                }
            })
            .collect();
        if addrs.is_empty() {
            return Err(ResolveError::InvalidMultiaddr(id.to_string()));
        }

        let ip = first_public_ip(&addrs)
            .await
            .ok_or_else(|| ResolveError::NoPublicAddress(id.to_string()))?;
        let location = self.resolve_location(ip).await?;

        Ok(Provider {
            id: info.id,
            peer_id: info.peer_id,
            multiaddrs: info.multiaddrs,
            country: location.country,
            continent: location.continent,
        })
    }

    /// Drop expired entries from both caches. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        self.providers.purge_expired() + self.locations.purge_expired()
    }

    pub fn cached(&self) -> (usize, usize) {
        (self.providers.len(), self.locations.len())
    }
}

async fn first_public_ip(addrs: &[Multiaddr]) -> Option<IpAddr> {
    for addr in addrs {
        let candidates = match addr.host() {
            Some(Host::Ip(ip)) => vec![ip],
            Some(Host::Name(name)) => {
                let port = addr.tcp_port().unwrap_or(0);
                match tokio::net::lookup_host((name.as_str(), port)).await {
                    Ok(found) => found.map(|sa| sa.ip()).collect(),
                    Err(e) => {
                        debug!(host = %name, error = %e, "dns lookup failed");
                        continue;
                    }
                }
            }
            None => continue,
        };
        if let Some(ip) = candidates.into_iter().find(|ip| is_public(*ip)) {
            return Some(ip);
        }
    }
    None
}
