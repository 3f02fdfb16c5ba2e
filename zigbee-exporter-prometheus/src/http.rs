//! HTTP server for the Prometheus snapshot endpoint.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::collector::SharedMetricSet;
use crate::error::ExporterError;

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    metrics: SharedMetricSet,
    render_timeout: Duration,
}

/// Create the HTTP router.
fn create_router(
    metrics: SharedMetricSet,
    metrics_path: &str,
    render_timeout: Duration,
) -> Router {
    let state = AppState {
        metrics,
        render_timeout,
    };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Render a snapshot off the async workers, bounded by `timeout`.
async fn render_snapshot(
    metrics: SharedMetricSet,
    timeout: Duration,
) -> Result<String, ExporterError> {
    render_with_timeout(move || metrics.render(), timeout).await
}

async fn render_with_timeout<F>(render: F, timeout: Duration) -> Result<String, ExporterError>
where
    F: FnOnce() -> Result<String, ExporterError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(render);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ExporterError::render(format!("render task failed: {}", e))),
        Err(_) => Err(ExporterError::render(format!(
            "render timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Handler for the snapshot endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    debug!("Exporting Prometheus snapshot");

    snapshot_response(render_snapshot(state.metrics, state.render_timeout).await)
}

/// Turn a render result into the scrape response.
///
/// Failures are reported as `400 Bad Request` with the error text as body.
fn snapshot_response(rendered: Result<String, ExporterError>) -> Response {
    match rendered {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render snapshot");
            (StatusCode::BAD_REQUEST, format!("{}\n", e)).into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    let stats = state.metrics.stats();

    if stats.messages_received > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no MQTT message received yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    metrics: SharedMetricSet,
    listen_addr: SocketAddr,
    metrics_path: String,
    render_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        metrics: SharedMetricSet,
        listen_addr: SocketAddr,
        metrics_path: String,
        render_timeout: Duration,
    ) -> Self {
        Self {
            metrics,
            listen_addr,
            metrics_path,
            render_timeout,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.metrics, &self.metrics_path, self.render_timeout);

        info!(
            addr = %listener.local_addr()?,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
