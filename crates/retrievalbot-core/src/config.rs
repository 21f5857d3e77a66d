//! Settings file (TOML). Every field has a default, so an empty file or a
//! missing section is valid.
//!
//! `IPINFO_TOKEN` and `LOTUS_API_TOKEN` override the tokens in the file. They
//! may also come from a `.env` file, see [`load_env_file`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::SchedulerSettings;
use crate::domain::Module;
use crate::impls::{DEFAULT_FEED_URL, DEFAULT_IPINFO_URL, DEFAULT_LOTUS_URL, QueuePolicy};
use crate::mirror::MirrorSettings;
use crate::resolver::ResolverSettings;

pub const IPINFO_TOKEN_ENV: &str = "IPINFO_TOKEN";
pub const LOTUS_TOKEN_ENV: &str = "LOTUS_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("cannot load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

/// Load `path` (or `.env` found from the working directory up) into the
/// process environment. Variables already set win. A missing file is not an
/// error; returns whether one was loaded.
pub fn load_env_file(path: Option<&Path>) -> Result<bool, ConfigError> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match loaded {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mirror: MirrorConfig,
    pub scheduler: SchedulerConfig,
    pub resolver: ResolverConfig,
    pub queue: QueueConfig,
    pub workers: WorkersConfig,
    pub stores: StoresConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// `http(s)://` URL, `file://` URL or plain path.
    pub feed_url: String,
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Entries may themselves be comma-separated lists.
    pub providers: Vec<String>,
    pub clients: Vec<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            batch_size: 1000,
            interval_secs: 6 * 60 * 60,
            providers: Vec::new(),
            clients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub requester: String,
    pub batch_size: usize,
    /// Strength of the push against frequent providers; 0 samples uniformly.
    pub bias: f64,
    pub modules: Vec<Module>,
    pub task_timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            requester: "filplus".to_string(),
            batch_size: 100,
            bias: 4.0,
            modules: vec![Module::Http],
            task_timeout_secs: 15,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub provider_ttl_secs: u64,
    pub location_ttl_secs: u64,
    pub lotus_url: String,
    pub lotus_token: Option<String>,
    pub ipinfo_url: String,
    pub ipinfo_token: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_ttl_secs: 24 * 60 * 60,
            location_ttl_secs: 24 * 60 * 60,
            lotus_url: DEFAULT_LOTUS_URL.to_string(),
            lotus_token: None,
            ipinfo_url: DEFAULT_IPINFO_URL.to_string(),
            ipinfo_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub lease_secs: u64,
    pub sweep_interval_secs: u64,
    /// Unset keeps queued tasks forever.
    pub max_task_age_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: 10 * 60,
            sweep_interval_secs: 60,
            max_task_age_secs: Some(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Loops per module. Modules missing here get none.
    pub concurrency: BTreeMap<Module, usize>,
    pub idle_poll_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            concurrency: BTreeMap::from([(Module::Http, 4)]),
            idle_poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Append results to this JSON-lines file instead of keeping them in
    /// memory.
    pub results_path: Option<PathBuf>,
}

impl Settings {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `path` if given, otherwise start from defaults; then apply the
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::parse(&text)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(IPINFO_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.resolver.ipinfo_token = Some(token);
        }
        if let Some(token) = lookup(LOTUS_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.resolver.lotus_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.mirror.batch_size == 0, "mirror.batch_size must be positive"),
            (self.mirror.interval_secs == 0, "mirror.interval_secs must be positive"),
            (self.scheduler.batch_size == 0, "scheduler.batch_size must be positive"),
            (self.scheduler.interval_secs == 0, "scheduler.interval_secs must be positive"),
            (self.scheduler.modules.is_empty(), "scheduler.modules must not be empty"),
            (self.scheduler.requester.is_empty(), "scheduler.requester must not be empty"),
            (!self.scheduler.bias.is_finite(), "scheduler.bias must be a finite number"),
            (self.queue.lease_secs == 0, "queue.lease_secs must be positive"),
            (self.queue.sweep_interval_secs == 0, "queue.sweep_interval_secs must be positive"),
        ];
        match checks.into_iter().find(|(bad, _)| *bad) {
            Some((_, msg)) => Err(ConfigError::Invalid(msg.to_string())),
            None => Ok(()),
        }
    }

    pub fn allow_list(&self) -> HashSet<String> {
        self.mirror
            .providers
            .iter()
            .chain(&self.mirror.clients)
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn mirror_settings(&self) -> MirrorSettings {
        MirrorSettings {
            batch_size: self.mirror.batch_size,
            allow_list: self.allow_list(),
        }
    }

    pub fn mirror_interval(&self) -> Duration {
        Duration::from_secs(self.mirror.interval_secs)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            requester: self.scheduler.requester.clone(),
            batch_size: self.scheduler.batch_size,
            modules: self.scheduler.modules.clone(),
            task_timeout: Duration::from_secs(self.scheduler.task_timeout_secs),
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            provider_ttl: Duration::from_secs(self.resolver.provider_ttl_secs),
            location_ttl: Duration::from_secs(self.resolver.location_ttl_secs),
        }
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            lease_duration: Duration::from_secs(self.queue.lease_secs),
            max_task_age: self.queue.max_task_age_secs.map(Duration::from_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.queue.sweep_interval_secs)
    }

    pub fn concurrency(&self, module: Module) -> usize {
        self.workers.concurrency.get(&module).copied().unwrap_or(0)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.workers.idle_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.scheduler.requester, "filplus");
        assert_eq!(settings.scheduler.batch_size, 100);
        assert_eq!(settings.resolver.lotus_url, "https://api.node.glif.io/rpc/v0");
        assert_eq!(settings.concurrency(Module::Http), 4);
        assert_eq!(settings.concurrency(Module::Bitswap), 0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::parse(
            r#"
            [scheduler]
            batch_size = 10
            modules = ["http", "graphsync"]

            [mirror]
            providers = ["f01,f02", " f03 "]
            clients = ["f0c"]

            [workers.concurrency]
            graphsync = 2

            [stores]
            results_path = "/var/lib/retrievalbot/results.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(settings.scheduler.batch_size, 10);
        assert_eq!(settings.scheduler.bias, 4.0);
        assert_eq!(settings.scheduler.modules, vec![Module::Http, Module::Graphsync]);
        assert_eq!(settings.mirror.batch_size, 1000);
        assert_eq!(settings.concurrency(Module::Graphsync), 2);
        assert_eq!(settings.concurrency(Module::Http), 0);
        assert!(settings.stores.results_path.is_some());

        let allow = settings.allow_list();
        assert_eq!(allow.len(), 4);
        assert!(allow.contains("f03") && allow.contains("f0c"));
    }

    #[test]
    fn env_overrides_tokens() {
        let mut settings = Settings::parse("[resolver]\nipinfo_token = \"from-file\"").unwrap();
        settings.apply_env(|key| match key {
            LOTUS_TOKEN_ENV => Some("lotus-env".to_string()),
            IPINFO_TOKEN_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.resolver.ipinfo_token.as_deref(), Some("from-file"));
        assert_eq!(settings.resolver.lotus_token.as_deref(), Some("lotus-env"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Settings::parse("[scheduler]\nmodules = []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("modules")));
        assert!(matches!(
            Settings::parse("[scheduler]\nmodules = [\"ftp\"]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn converts_to_component_settings() {
        let settings = Settings::default();
        assert_eq!(settings.queue_policy().lease_duration, Duration::from_secs(600));
        assert_eq!(settings.scheduler_settings().task_timeout, Duration::from_secs(15));
        assert_eq!(settings.mirror_interval(), Duration::from_secs(6 * 60 * 60));
        assert!(settings.mirror_settings().allow_list.is_empty());
    }

    #[test]
    fn env_file_feeds_the_process_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "RETRIEVALBOT_ENV_FILE_CHECK=from-file\n").unwrap();

        assert!(load_env_file(Some(&path)).unwrap());
        assert_eq!(std::env::var("RETRIEVALBOT_ENV_FILE_CHECK").unwrap(), "from-file");

        assert!(!load_env_file(Some(&dir.path().join("missing.env"))).unwrap());
    }
}
