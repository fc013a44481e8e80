//! HTTP server: payment webhook endpoints, the administrative order API,
//! health and Prometheus metrics.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{MatchedPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use service::OrderService;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use webhooks::WebhookProcessor;

mod metrics;
mod orders;
mod webhook_routes;

use metrics::Metrics;

/// Server exposes the order lifecycle over HTTP.
pub struct Server {
    port: u16,
    shutdown_timeout: Duration,
    state: AppState,
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    service: Arc<dyn OrderService>,
    processor: Arc<WebhookProcessor>,
    metrics: Arc<Metrics>,
}

impl Server {
    pub fn new(
        port: u16,
        shutdown_timeout: Duration,
        service: Arc<dyn OrderService>,
        processor: Arc<WebhookProcessor>,
    ) -> Result<Self> {
        info!(port, "Initializing HTTP server");
        let metrics = Metrics::new().context("Failed to register metrics")?;

        Ok(Self {
            port,
            shutdown_timeout,
            state: AppState {
                service,
                processor,
                metrics: Arc::new(metrics),
            },
        })
    }

    /// Starts the server and blocks until it's shut down. In-flight requests
    /// get `shutdown_timeout` to finish after the signal.
    pub async fn start(&self) -> Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("Failed to bind to port {}", self.port))?;

        info!(port = self.port, "HTTP server listening");

        let signalled = Arc::new(Notify::new());
        let notify = signalled.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                notify.notify_one();
            })
            .into_future();
        let deadline = async {
            signalled.notified().await;
            tokio::time::sleep(self.shutdown_timeout).await;
        };

        tokio::select! {
            res = serve => res.context("Server error")?,
            _ = deadline => {
                warn!(timeout = ?self.shutdown_timeout, "Graceful shutdown timed out");
                return Ok(());
            }
        }

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    /// Builds the router with all routes and the metrics middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhooks/adyen", post(webhook_routes::adyen))
            .route("/webhooks/gopay", post(webhook_routes::gopay))
            .route("/webhooks/wepay", post(webhook_routes::wepay))
            .route("/api/orders/{id}", get(orders::get_order))
            .route("/api/orders/{id}/status", patch(orders::update_status))
            .route("/api/orders/{id}/dispatch", post(orders::dispatch))
            .route("/api/orders/{id}/deliveries", get(orders::deliveries))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics_middleware,
            ))
            .with_state(self.state.clone())
    }
}

/// Endpoint label for requests that matched no route.
const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Middleware for collecting metrics on HTTP requests. Requests are labelled
/// with the route template (`/api/orders/{id}`), never the raw path.
async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let request_size = content_length(req.headers());
    if request_size > 0 {
        metrics.record_network_traffic("in", request_size);
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();

    metrics.record_request(&method, &path, status, start.elapsed());
    if status >= 400 {
        metrics.record_error("http", &path);
    }

    let response_size = content_length(response.headers());
    if response_size > 0 {
        metrics.record_network_traffic("out", response_size);
    }

    response
}

fn content_length(headers: &axum::http::HeaderMap) -> usize {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0)
}

async fn handle_health() -> &'static str {
    debug!("Health check requested");
    "OK"
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
