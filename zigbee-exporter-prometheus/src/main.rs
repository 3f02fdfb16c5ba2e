//! Prometheus exporter for zigbee2mqtt.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use zigbee_exporter_prometheus::{
    ExporterConfig, HttpServer, MessageRouter, MetricCatalog, MetricSet, SubscriptionManager,
    init_tracing,
};

/// Prometheus exporter for zigbee2mqtt.
#[derive(Parser, Debug)]
#[command(name = "zigbee-exporter-prometheus")]
#[command(about = "Export zigbee2mqtt device readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// MQTT broker as host or host:port (overrides config).
    #[arg(long)]
    broker: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

fn apply_overrides(config: &mut ExporterConfig, args: &Args) -> anyhow::Result<()> {
    if let Some(listen) = &args.listen {
        config.prometheus.listen = listen.clone();
    }

    if let Some(broker) = &args.broker {
        match broker.rsplit_once(':') {
            Some((host, port)) => {
                config.mqtt.host = host.to_string();
                config.mqtt.port = port
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid broker port '{}': {}", port, e))?;
            }
            None => config.mqtt.host = broker.clone(),
        }
    }

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(())
}

/// Spawn a long-running component; if it fails, its name is sent on `fatal`.
fn spawn_supervised<F, E>(
    component: &'static str,
    task: F,
    fatal: mpsc::Sender<&'static str>,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(component, error = %e, "Component failed");
            let _ = fatal.send(component).await;
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    apply_overrides(&mut config, &args)?;

    init_tracing(&config.logging)?;

    info!("Starting zigbee2mqtt Prometheus Exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(MetricSet::new(MetricCatalog::zigbee()));

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create components
    let router = MessageRouter::new(metrics.clone(), config.mqtt.topic_prefix.clone());
    let subscriber =
        SubscriptionManager::new(router, config.mqtt.clone(), config.reconnect.clone());
    let http_server = HttpServer::new(
        metrics.clone(),
        listen_addr,
        config.prometheus.path.clone(),
        config.prometheus.render_timeout(),
    );

    // A failure of either component stops the whole exporter
    let (fatal_tx, mut fatal_rx) = mpsc::channel(2);
    let subscriber_task = spawn_supervised(
        "MQTT subscriber",
        subscriber.run(shutdown_rx.clone()),
        fatal_tx.clone(),
    );
    let http_task = spawn_supervised("HTTP server", http_server.run(shutdown_rx), fatal_tx);

    // Wait for shutdown signal
    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            None
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        Some(component) = fatal_rx.recv() => {
            error!(component, "Component failed, shutting down...");
            Some(component)
        }
    };

    // Signal shutdown; a failed component may already have dropped its receiver
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = subscriber_task.await;
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    let stats = metrics.stats();
    info!(
        messages_received = stats.messages_received,
        messages_applied = stats.messages_applied,
        unhandled_topics = stats.unhandled_topics,
        malformed_payloads = stats.malformed_payloads,
        series_count = metrics.series_count(),
        "Final statistics"
    );

    if let Some(component) = fatal {
        anyhow::bail!("{} failed", component);
    }

    info!("Exporter stopped");
    Ok(())
}
