//! Health check endpoints and Prometheus metrics server
//!
//! Serves the health endpoints, the Prometheus text exposition and a JSON stats summary
//! over Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Typically "0.0.0.0" for all interfaces
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub health_check: Option<Arc<HealthCheck>>,
}

/// HTTP server for monitoring endpoints
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                health_check: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the component checks used by the health endpoints
    pub fn with_health_check(mut self, health_check: Arc<HealthCheck>) -> Self {
        self.state.health_check = Some(health_check);
        self
    }

    /// Serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }

        Ok(())
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "service": "rendezvous",
            "version": env!("CARGO_PKG_VERSION"),
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "rendezvous",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Health check requested");

    let Some(health_check) = &state.health_check else {
        return not_initialized();
    };

    let report = health_check.check().await;
    (
        status_code(report.status),
        Json(json!({
            "status": report.status,
            "service": report.service,
            "version": report.version,
            "uptime_seconds": report.uptime_seconds,
            "checks": report.checks
        })),
    )
        .into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Readiness check requested");

    match &state.health_check {
        Some(health_check) => match health_check.readiness_check().await {
            HealthStatus::Healthy => (StatusCode::OK, "Ready").into_response(),
            HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready").into_response(),
            HealthStatus::Unhealthy => {
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response()
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response(),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    match &state.health_check {
        Some(health_check) => match health_check.liveness_check() {
            HealthStatus::Healthy => (StatusCode::OK, "Alive").into_response(),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive").into_response(),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            output,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Stats endpoint requested");

    let Some(health_check) = &state.health_check else {
        return not_initialized();
    };

    let report = health_check.check().await;
    (
        status_code(report.status),
        Json(json!({
            "service": {
                "name": report.service,
                "version": report.version,
                "status": report.status,
                "uptime_seconds": report.uptime_seconds
            },
            "matching": report.stats,
            "components": report.checks,
            "timestamp": report.timestamp
        })),
    )
        .into_response()
}
