//! Health checks for readiness and liveness endpoints

use crate::amqp::AmqpConnection;
use crate::metrics::collector::{MatchingStats, MetricsCollector};
use crate::store::SearchPool;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `health_status`
    pub fn gauge_value(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.gauge_value() <= other.gauge_value() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Full health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub checks: Vec<ComponentCheck>,
    pub stats: MatchingStats,
}

impl HealthReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health report: {}", e))
    }
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Probes the components the service depends on
pub struct HealthCheck {
    service_name: String,
    pool: Arc<dyn SearchPool>,
    amqp: Option<Arc<AmqpConnection>>,
    metrics: Arc<MetricsCollector>,
    running: Arc<AtomicBool>,
    started_at: Instant,
    check_timeout: Duration,
}

impl HealthCheck {
    pub fn new(
        service_name: &str,
        pool: Arc<dyn SearchPool>,
        metrics: Arc<MetricsCollector>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            pool,
            amqp: None,
            metrics,
            running,
            started_at: Instant::now(),
            check_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp = Some(connection);
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check every component and collect the current statistics
    pub async fn check(&self) -> HealthReport {
        let mut checks = vec![self.check_service_running()];
        checks.push(self.check_search_pool().await);
        if self.amqp.is_some() {
            checks.push(self.check_amqp());
        }

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        for check in &checks {
            self.metrics
                .update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
        }
        self.metrics.update_health_status(status.gauge_value());

        HealthReport {
            status,
            service: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            checks,
            stats: self.metrics.stats(),
        }
    }

    /// The process is up and has not begun shutting down
    pub fn liveness_check(&self) -> HealthStatus {
        if self.is_running() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// The service can take search commands
    pub async fn readiness_check(&self) -> HealthStatus {
        if !self.is_running() {
            return HealthStatus::Unhealthy;
        }

        let mut status = self.check_search_pool().await.status;
        if self.amqp.is_some() {
            status = status.worst(self.check_amqp().status);
        }
        status
    }

    fn check_service_running(&self) -> ComponentCheck {
        let (status, message) = if self.is_running() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }

    async fn check_search_pool(&self) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match tokio::time::timeout(self.check_timeout, self.pool.size()).await
        {
            Ok(Ok(size)) => {
                self.metrics.update_pool_size(size);
                (HealthStatus::Healthy, None)
            }
            Ok(Err(e)) => {
                warn!("Search pool health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
            Err(_) => (
                HealthStatus::Degraded,
                Some(format!("Pool size check exceeded {:?}", self.check_timeout)),
            ),
        };

        ComponentCheck {
            name: "search_pool".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(&self) -> ComponentCheck {
        let (status, message) = match &self.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (HealthStatus::Healthy, None),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }
}
