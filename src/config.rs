//! Process configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::dispatcher::DispatcherConfig;
use crate::storage::InMemoryStorage;
use crate::transport::DEFAULT_USER_AGENT;
use crate::types::{Route, Source, Target};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "WEBHOOK_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "webhook-relay.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Key for legacy body signatures when a source has no secret of its own.
    #[serde(default)]
    pub fallback_signature_secret: Option<String>,

    /// Cache resolved sources by lookup key. Cached entries live until the
    /// process restarts, so deactivated or re-keyed sources keep resolving.
    #[serde(default)]
    pub source_cache: bool,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Postgres connection string; in-memory storage when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl DispatcherSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            request_timeout: self.request_timeout(),
        }
    }
}

/// Records loaded into in-memory storage at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl SeedConfig {
    pub async fn apply(&self, storage: &InMemoryStorage) {
        for source in &self.sources {
            storage.insert_source(source.clone()).await;
        }
        for target in &self.targets {
            storage.insert_target(target.clone()).await;
        }
        for route in &self.routes {
            storage.insert_route(route.clone()).await;
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl RelayConfig {
    /// Loads the TOML file named by `WEBHOOK_RELAY_CONFIG` (optional), then
    /// `WEBHOOK_RELAY__*` environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config = Config::builder()
            .add_source(File::with_name(&path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("WEBHOOK_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {path}"))?;

        let relay: RelayConfig = config.try_deserialize().context("invalid configuration")?;
        relay.validate()?;
        Ok(relay)
    }

    /// Parse configuration from TOML text alone.
    pub fn from_toml(text: &str) -> Result<Self> {
        let relay: RelayConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
            .context("invalid configuration")?;
        relay.validate()?;
        Ok(relay)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("invalid port: 0");
        }
        if self.dispatcher.worker_count == 0 {
            anyhow::bail!("dispatcher.worker_count must be at least 1");
        }
        if self.dispatcher.request_timeout_secs == 0 {
            anyhow::bail!("dispatcher.request_timeout_secs must be at least 1");
        }
        if self.database_url.is_some() && !self.seed.sources.is_empty() {
            tracing::warn!("seed records are ignored when database_url is set");
        }
        Ok(())
    }
}
