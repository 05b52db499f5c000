//! Configuration loading and management

use anyhow::{Context, Result};
use querylane_core::{FingerprintMode, RetryOn, RetryPolicy, StreamConfig};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Table read by the streaming commands
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table: default_table(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_ms: default_delay_ms(),
            retry_on: RetryOn::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.delay_ms))
            .with_retry_on(self.retry_on)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamingConfig {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            batch_size: self.batch_size,
            page_size: self.page_size,
            channel_capacity: self.channel_capacity,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Log each query before it runs
    #[serde(default)]
    pub log_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_queries: false,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Print a Prometheus snapshot after each command
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions

fn default_db_path() -> String {
    "./data/querylane.db".to_string()
}

fn default_table() -> String {
    querylane_db::DEFAULT_TABLE.to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_page_size() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Raise a size below one to one, logging the adjustment
fn at_least_one(name: &str, value: usize) -> usize {
    if value == 0 {
        warn!("{} must be at least 1, using 1", name);
        1
    } else {
        value
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.clamp();

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Bring out-of-range values back into range
    fn clamp(&mut self) {
        if self.retry.retries == 0 {
            warn!("retry.retries must be at least 1, using 1");
            self.retry.retries = 1;
        }
        self.streaming.batch_size = at_least_one("streaming.batch_size", self.streaming.batch_size);
        self.streaming.page_size = at_least_one("streaming.page_size", self.streaming.page_size);
        self.streaming.channel_capacity =
            at_least_one("streaming.channel_capacity", self.streaming.channel_capacity);

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            warn!(
                "Unknown logging.format '{}', using pretty",
                self.logging.format
            );
            self.logging.format = default_log_format();
        }
    }

    /// Save configuration to a file atomically
    ///
    /// The content is written to a temporary file in the target directory and
    /// renamed over the target, so a crash mid-write leaves the old file intact.
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all()
                .with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }
}
