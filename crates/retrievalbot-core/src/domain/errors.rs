//! Error taxonomy shared by every component.
//!
//! Each error exposes an [`ErrorKind`] so loops can decide how to react:
//! log and retry next tick, skip one deal, or record a failed attempt.

use thiserror::Error;

use super::ids::TaskId;
use super::outcome::ErrorCode;

/// Operational classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup; retry at the next scheduled interval.
    Transient,
    /// Upstream data could not be decoded; abort the pass.
    Malformed,
    /// A provider could not be resolved; skip it this cycle.
    Resolution,
    /// The store rejected an operation; abort the pass.
    Storage,
    /// An upstream request ran past its deadline; retry like a transient.
    Timeout,
}

/// Errors from the deal store, task queue and result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("lease on {0} is no longer held")]
    LeaseLost(TaskId),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// Errors from the upstream lookups behind the resolver.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LookupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LookupError::Request(e) if e.is_timeout() => ErrorKind::Timeout,
            LookupError::Request(_) | LookupError::Status(_) | LookupError::Upstream(_) => {
                ErrorKind::Transient
            }
            LookupError::Malformed(_) => ErrorKind::Malformed,
        }
    }
}

/// Why a provider could not be turned into a retrievable target.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("provider {0} has no peer id on chain")]
    NoPeerId(String),

    #[error("provider {0} has no multiaddrs on chain")]
    NoMultiaddrs(String),

    #[error("provider {0} has no public address among its multiaddrs")]
    NoPublicAddress(String),

    #[error("chain lookup for provider {id} failed")]
    ProviderLookup {
        id: String,
        #[source]
        source: LookupError,
    },

    #[error("location lookup for {address} failed")]
    LocationLookup {
        address: String,
        #[source]
        source: LookupError,
    },

    /// Registered multiaddrs exist but none decodes. Not permanent: a newer
    /// decoder or a re-registration may fix it.
    #[error("provider {0} has no decodable multiaddr")]
    InvalidMultiaddr(String),
}

impl ResolveError {
    /// True when no retrieval attempt could ever succeed with the provider's
    /// current on-chain registration. Upstream failures are not permanent.
    pub fn is_permanent(&self) -> bool {
        self.error_code().is_some()
    }

    /// Error code recorded when a permanent failure bypasses the queue.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ResolveError::NoPeerId(_) => Some(ErrorCode::NoPeerId),
            ResolveError::NoMultiaddrs(_) => Some(ErrorCode::NoMultiaddrs),
            ResolveError::NoPublicAddress(_) => Some(ErrorCode::NoPublicAddress),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::ProviderLookup { source, .. } | ResolveError::LocationLookup { source, .. }
                if source.kind() == ErrorKind::Timeout =>
            {
                ErrorKind::Timeout
            }
            _ => ErrorKind::Resolution,
        }
    }
}
