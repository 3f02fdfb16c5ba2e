//! Prometheus metrics exporter for zigbee2mqtt.
//!
//! This crate subscribes to zigbee2mqtt device topics on an MQTT broker,
//! keeps the last reported power, climate and air quality readings per
//! device, and exposes them via an HTTP endpoint for Prometheus scraping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   MQTT Broker   │────>│ Subscription    │────>│  MessageRouter  │────>│    MetricSet    │
//! │ (zigbee2mqtt/*) │     │    Manager      │     │ (field mapping) │     │ (last values)   │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                                                  │
//!                                                                         ┌────────v────────┐
//!                                                                         │   HTTP Server   │
//!                                                                         │  (/prometheus)  │
//!                                                                         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! zigbee-exporter-prometheus --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod mapping;
pub mod router;
pub mod subscriber;

pub use catalog::{MetricCatalog, MetricDefinition};
pub use collector::{MetricSet, SharedMetricSet};
pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use http::HttpServer;
pub use router::{MessageRouter, RouteOutcome};
pub use subscriber::SubscriptionManager;

use config::{LogFormat, LoggingConfig};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},rumqttc=warn", config.level)))?;

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
