//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::router::DEFAULT_TOPIC_PREFIX;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// MQTT broker and subscription settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Broker reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port (default: 1883).
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client identifier (default: "promlogger").
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Start with a clean session (default: true).
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// zigbee2mqtt base topic (default: "zigbee2mqtt").
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Friendly names of the devices to subscribe to.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,

    /// Capacity of the client request channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "promlogger".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_clean_session() -> bool {
    true
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_devices() -> Vec<String> {
    [
        "Servers",
        "Koelkast",
        "Gang",
        "Slaapkamer",
        "TV (bovenste stekker)",
        "TV (onderste stekker)",
        "Koffie",
        "Bureau (bovenste stekker)",
        "Bureau (onderste stekker)",
        "Air Meter",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_channel_capacity() -> usize {
    10
}

impl MqttConfig {
    /// Full topics to subscribe to, one per device.
    pub fn topics(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|device| format!("{}/{}", self.topic_prefix, device))
            .collect()
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            topic_prefix: default_topic_prefix(),
            devices: default_devices(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8053").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/prometheus").
    #[serde(default = "default_path")]
    pub path: String,

    /// Upper bound on snapshot rendering time in milliseconds.
    #[serde(default = "default_render_timeout")]
    pub render_timeout_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8053".to_string()
}

fn default_path() -> String {
    "/prometheus".to_string()
}

fn default_render_timeout() -> u64 {
    2000
}

impl PrometheusConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            render_timeout_ms: default_render_timeout(),
        }
    }
}

/// Reconnect policy for broker connection errors.
///
/// With `enabled = false` the first connection error is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubling delay (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failures before giving up (0 = retry forever).
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_attempts: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT host must not be empty".to_string(),
            ));
        }

        if self.mqtt.port == 0 {
            return Err(ConfigError::Validation("MQTT port must be > 0".to_string()));
        }

        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(ConfigError::Validation(
                "MQTT username and password must be set together".to_string(),
            ));
        }

        let prefix = &self.mqtt.topic_prefix;
        if prefix.is_empty() || prefix.contains(['/', '#', '+']) {
            return Err(ConfigError::Validation(format!(
                "Invalid topic prefix: {:?}",
                prefix
            )));
        }

        if self.mqtt.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        if let Some(device) = self
            .mqtt
            .devices
            .iter()
            .find(|d| d.is_empty() || d.contains(['/', '#', '+']))
        {
            return Err(ConfigError::Validation(format!(
                "Invalid device name: {:?}",
                device
            )));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.prometheus.render_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "render_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.reconnect.initial_backoff_ms == 0 {
            return Err(ConfigError::Validation(
                "initial_backoff_ms must be > 0".to_string(),
            ));
        }

        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::Validation(
                "initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }
}
