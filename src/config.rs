//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `DEVHUB_*` environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub devices: DevicesConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Device socket listeners
#[derive(Debug, Clone, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Port devices connect to for bootstrap and pushed patches
    #[serde(default = "default_config_port")]
    pub config_port: u16,

    /// Port devices stream data submissions to
    #[serde(default = "default_data_port")]
    pub data_port: u16,
}

fn default_config_port() -> u16 {
    9000
}

fn default_data_port() -> u16 {
    9001
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            config_port: default_config_port(),
            data_port: default_data_port(),
        }
    }
}

impl DevicesConfig {
    pub fn config_addr(&self) -> String {
        format!("{}:{}", self.host, self.config_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.data_port)
    }
}

/// Event bus topics
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_patch_topic")]
    pub patch_topic: String,

    #[serde(default = "default_data_topic")]
    pub data_topic: String,

    /// Events buffered per subscriber before the oldest are skipped
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_patch_topic() -> String {
    crate::events::DEFAULT_PATCH_TOPIC.to_string()
}

fn default_data_topic() -> String {
    crate::events::DEFAULT_DATA_TOPIC.to_string()
}

fn default_broadcast_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            patch_topic: default_patch_topic(),
            data_topic: default_data_topic(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Connection write settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Frames queued per websocket observer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Frames waiting on one connection before it counts as stalled
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
            channel_capacity: default_channel_capacity(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_observers")]
    pub max_observers_per_device: usize,
}

fn default_max_observers() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_observers_per_device: default_max_observers(),
        }
    }
}

/// Subscription retry budget
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_delay")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_delay() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("devhub").join("config.toml")),
            Some(PathBuf::from("/etc/devhub/config.toml")),
            Some(PathBuf::from("./devhub.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject settings the hub cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.events.patch_topic.is_empty() || self.events.data_topic.is_empty() {
            return invalid("event topics cannot be empty");
        }
        if self.events.patch_topic == self.events.data_topic {
            return invalid("patch and data topics must differ");
        }
        if self.devices.config_port == self.devices.data_port {
            return invalid("device config and data ports must differ");
        }
        if self.delivery.write_timeout_ms == 0 {
            return invalid("delivery.write_timeout_ms must be positive");
        }
        if self.delivery.queue_capacity == 0 {
            return invalid("delivery.queue_capacity must be at least 1");
        }
        if self.stream.max_observers_per_device == 0 {
            return invalid("stream.max_observers_per_device must be at least 1");
        }
        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1");
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // API overrides
        if let Some(host) = lookup("DEVHUB_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("DEVHUB_API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }

        // Device listener overrides
        if let Some(host) = lookup("DEVHUB_DEVICES_HOST") {
            self.devices.host = host;
        }
        if let Some(port) = lookup("DEVHUB_CONFIG_PORT").and_then(|p| p.parse().ok()) {
            self.devices.config_port = port;
        }
        if let Some(port) = lookup("DEVHUB_DATA_PORT").and_then(|p| p.parse().ok()) {
            self.devices.data_port = port;
        }

        // Event overrides
        if let Some(topic) = lookup("DEVHUB_PATCH_TOPIC") {
            self.events.patch_topic = topic;
        }
        if let Some(topic) = lookup("DEVHUB_DATA_TOPIC") {
            self.events.data_topic = topic;
        }

        if let Some(ms) = lookup("DEVHUB_WRITE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.delivery.write_timeout_ms = ms;
        }

        // Logging overrides
        if let Some(level) = lookup("DEVHUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("DEVHUB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# devhub Configuration
#
# Environment variables override these settings:
# - DEVHUB_API_HOST, DEVHUB_API_PORT
# - DEVHUB_DEVICES_HOST, DEVHUB_CONFIG_PORT, DEVHUB_DATA_PORT
# - DEVHUB_PATCH_TOPIC, DEVHUB_DATA_TOPIC
# - DEVHUB_WRITE_TIMEOUT_MS
# - DEVHUB_LOG_LEVEL, DEVHUB_LOG_FORMAT

[api]
# HTTP and websocket server
host = "0.0.0.0"
port = 8080

[devices]
# TCP listeners for appliances (newline-delimited JSON)
host = "0.0.0.0"
config_port = 9000
data_port = 9001

[events]
patch_topic = "cfg.patched"
data_topic = "dev.data"

# Events buffered per subscriber before the oldest are skipped
broadcast_capacity = 1024

[delivery]
# Upper bound for one write to a device or dashboard (ms)
write_timeout_ms = 5000

# Frames queued per dashboard websocket
channel_capacity = 64

# Frames waiting on one device or dashboard before it is dropped as stalled
queue_capacity = 64

[stream]
max_observers_per_device = 64

[retry]
# Event subscription attempts before the service shuts down
attempts = 5
delay_ms = 500

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
