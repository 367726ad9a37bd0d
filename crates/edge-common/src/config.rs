//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the adapter runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_to_file() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_metrics_prefix() -> String {
    "edge.protocol-adapter".to_owned()
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_sample_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_event_capacity() -> usize {
    256
}

fn default_autostart() -> bool {
    true
}

fn default_polling_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_polling_errors() -> i32 {
    10
}

fn default_include_timestamp() -> bool {
    true
}

/// Primary configuration object for the adapter runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub adapters: IndexMap<String, AdapterConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "EDGE_CONFIG";

    /// Load configuration from disk, respecting the `EDGE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read, parse and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve an adapter configuration by identifier.
    pub fn adapter(&self, adapter_id: &str) -> Option<&AdapterConfig> {
        self.adapters.get(adapter_id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.adapters.is_empty() {
            return Err(anyhow!("configuration must declare at least one adapter"));
        }
        for (adapter_id, adapter) in &self.adapters {
            adapter.validate(adapter_id)?;
        }
        self.runtime.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter directive used when neither `EDGE_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_to_file")]
    pub file: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            level: default_log_level(),
            file: default_log_to_file(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
    /// Dotted namespace prefix for per-adapter counters.
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
            prefix: default_metrics_prefix(),
        }
    }
}

/// Knobs shared by every adapter hosted in the process.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on samples executing concurrently across all adapters.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_sample_timeout", rename = "sample_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sample_timeout: Duration,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            sample_timeout: default_sample_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(anyhow!("runtime.worker_pool_size must be at least 1"));
        }
        if self.sample_timeout.is_zero() {
            return Err(anyhow!("runtime.sample_timeout_ms must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow!("runtime.event_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// One configured protocol adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    /// Driver specific settings, interpreted by the driver factory.
    #[serde(default)]
    pub settings: IndexMap<String, Value>,
    #[serde(default)]
    pub polling: Vec<PollingConfig>,
}

impl AdapterConfig {
    pub fn validate(&self, adapter_id: &str) -> Result<()> {
        if adapter_id.trim().is_empty() {
            return Err(anyhow!("adapter identifiers must not be empty"));
        }
        if self.adapter_type.trim().is_empty() {
            return Err(anyhow!("adapter '{}' must declare a type", adapter_id));
        }
        for polling in &self.polling {
            polling
                .validate()
                .with_context(|| format!("adapter '{}' has invalid polling", adapter_id))?;
        }
        Ok(())
    }
}

/// Serialized form of a polling context.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub tag: String,
    #[serde(default = "default_polling_interval", rename = "interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(default)]
    pub min_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
    /// Negative values disable removal.
    #[serde(default = "default_max_polling_errors")]
    pub max_polling_errors_before_removal: i32,
    #[serde(default = "default_include_timestamp")]
    pub include_timestamp: bool,
    #[serde(default)]
    pub include_tag_names: bool,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub user_properties: Vec<UserPropertyConfig>,
}

impl PollingConfig {
    /// Construct a polling entry with defaults for everything but the tag.
    pub fn for_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            interval: default_polling_interval(),
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_polling_errors_before_removal: default_max_polling_errors(),
            include_timestamp: default_include_timestamp(),
            include_tag_names: false,
            destination: None,
            qos: 0,
            user_properties: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tag.trim().is_empty() {
            return Err(anyhow!("polling tag must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("polling '{}' interval_ms must be positive", self.tag));
        }
        if self.qos > 2 {
            return Err(anyhow!(
                "polling '{}' qos {} outside 0..=2",
                self.tag,
                self.qos
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow!(
                "polling '{}' min_delay_ms {} exceeds max_delay_ms {}",
                self.tag,
                self.min_delay_ms,
                self.max_delay_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPropertyConfig {
    pub name: String,
    pub value: String,
}
