//! Error types for the exporter.

use thiserror::Error;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised while ingesting, storing, or exporting metrics.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// The metric key is not part of the catalog.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// A gauge value was NaN or infinite.
    #[error("Non-finite value {value} for {metric}{{name=\"{identity}\"}}")]
    NonFiniteValue {
        metric: String,
        identity: String,
        value: f64,
    },

    /// Snapshot rendering failed.
    #[error("Render error: {0}")]
    Render(String),

    /// MQTT connection error.
    #[error("MQTT connection error: {0}")]
    Transport(String),

    /// MQTT subscribe request could not be queued.
    #[error("Failed to subscribe to {topics} topics: {message}")]
    Subscribe { topics: usize, message: String },
}

impl ExporterError {
    /// Create a render error.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<std::fmt::Error> for ExporterError {
    fn from(err: std::fmt::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for ExporterError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        Self::Transport(err.to_string())
    }
}
