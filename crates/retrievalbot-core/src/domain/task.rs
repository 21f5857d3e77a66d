//! Retrieval-test tasks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Retrieval protocol a task is executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Http,
    Graphsync,
    Bitswap,
}

impl Module {
    pub const ALL: [Module; 3] = [Module::Http, Module::Graphsync, Module::Bitswap];

    pub fn as_str(self) -> &'static str {
        match self {
            Module::Http => "http",
            Module::Graphsync => "graphsync",
            Module::Bitswap => "bitswap",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}

/// Provider descriptor carried by a task: identity plus geography.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
    pub country: String,
    pub continent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub cid: String,
}

/// One retrieval attempt to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Partitions the shared queue by producing pipeline.
    pub requester: String,
    pub module: Module,
    pub provider: Provider,
    pub content: Content,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
