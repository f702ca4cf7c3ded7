use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

/// Broker implementation a node connects to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Shared Redis server, the cluster deployment
    #[default]
    Redis,
    /// In-process channels, a single node with no siblings
    Memory,
}

/// Message broker used to replicate deliveries to sibling instances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    /// Gates every replication publish. Consumers are started either way.
    pub enabled: bool,
    pub url: String,
    /// Prefix of every destination name (`{prefix}module:CHAT`, `{prefix}SESSION`)
    pub key_prefix: String,
    /// Records waiting for the background publisher; overflow is dropped
    pub publish_queue_capacity: usize,
    pub timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Redis,
            enabled: false,
            url: "redis://localhost:6379".to_string(),
            key_prefix: "pushhub:".to_string(),
            publish_queue_capacity: 10_000,
            timeout_seconds: 5,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Local fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound of in-flight sends within one dispatch call
    pub max_concurrent_sends: usize,
    pub send_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 64,
            send_timeout_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PUSHHUB_BROKER__ENABLED=true, PUSHHUB_DISPATCH__MAX_CONCURRENT_SENDS=128, ...
        builder = builder.add_source(
            Environment::with_prefix("PUSHHUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for settings that would leave the hub unable to work.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.broker.kind == BrokerKind::Redis && self.broker.url.trim().is_empty() {
            errors.push("broker.url must be set when broker.kind is redis".to_string());
        }
        if self.broker.publish_queue_capacity == 0 {
            errors.push("broker.publish_queue_capacity must be greater than 0".to_string());
        }
        if self.dispatch.max_concurrent_sends == 0 {
            errors.push("dispatch.max_concurrent_sends must be greater than 0".to_string());
        }
        if self.dispatch.send_timeout_ms == 0 {
            errors.push("dispatch.send_timeout_ms must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
