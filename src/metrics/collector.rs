//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the rendezvous pairing service
//! using Prometheus metrics.

use crate::types::SearchMode;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a pairing was committed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingSource {
    /// Event-driven match worker reacting to a broadcast
    Worker,
    /// Periodic reconciliation sweep
    Sweep,
}

impl PairingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingSource::Worker => "worker",
            PairingSource::Sweep => "sweep",
        }
    }
}

/// Why a participant left the searching pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Paired,
    Withdrawn,
    NotSearching,
    RecordExpired,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Paired => "paired",
            EvictionReason::Withdrawn => "withdrawn",
            EvictionReason::NotSearching => "not_searching",
            EvictionReason::RecordExpired => "record_expired",
        }
    }

    const ALL: [EvictionReason; 4] = [
        EvictionReason::Paired,
        EvictionReason::Withdrawn,
        EvictionReason::NotSearching,
        EvictionReason::RecordExpired,
    ];
}

/// Point-in-time summary served by the `/stats` endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchingStats {
    pub pool_size: i64,
    pub searches_submitted: u64,
    pub withdrawals: u64,
    pub pairings_by_worker: u64,
    pub pairings_by_sweep: u64,
    pub evictions: u64,
    pub lock_contention: u64,
    pub malformed_payloads: u64,
    pub notification_failures: u64,
    pub sessions_ended: u64,
}

/// Main metrics collector for the pairing service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Searching pool metrics
    search_metrics: SearchMetrics,

    /// Pairing metrics
    pairing_metrics: PairingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Searching pool metrics
#[derive(Clone)]
pub struct SearchMetrics {
    /// Search submissions by mode
    pub searches_submitted_total: IntCounterVec,

    /// Explicit withdrawals
    pub withdrawals_total: IntCounter,

    /// Current number of searching participants
    pub pool_size: IntGauge,

    /// Pool evictions by reason
    pub evictions_total: IntCounterVec,

    /// Broadcast or command payloads that failed to decode
    pub malformed_payloads_total: IntCounterVec,
}

/// Pairing metrics
#[derive(Clone)]
pub struct PairingMetrics {
    /// Committed pairings by mode and source
    pub pairings_total: IntCounterVec,

    /// Lock acquisitions that found the participant already locked
    pub lock_contention_total: IntCounterVec,

    /// Nearby attempts re-dispatched as random
    pub nearby_fallbacks_total: IntCounter,

    /// Failures of the store, bus or session collaborators by operation
    pub collaborator_errors_total: IntCounterVec,

    /// Notifications that could not be delivered
    pub notification_failures_total: IntCounter,

    /// Sessions closed by one of their participants
    pub sessions_ended_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of one event-driven match attempt
    pub match_attempt_duration: HistogramVec,

    /// Duration of one reconciliation sweep
    pub sweep_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with a private registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let search_metrics = SearchMetrics::new(&registry)?;
        let pairing_metrics = PairingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            search_metrics,
            pairing_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn search(&self) -> &SearchMetrics {
        &self.search_metrics
    }

    pub fn pairing(&self) -> &PairingMetrics {
        &self.pairing_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a search submission
    pub fn record_search_submitted(&self, mode: SearchMode) {
        self.search_metrics
            .searches_submitted_total
            .with_label_values(&[mode.as_str()])
            .inc();
    }

    /// Record an explicit withdrawal
    pub fn record_withdrawal(&self) {
        self.search_metrics.withdrawals_total.inc();
    }

    /// Record a participant leaving the pool
    pub fn record_eviction(&self, reason: EvictionReason) {
        self.search_metrics
            .evictions_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Record a payload that could not be decoded
    pub fn record_malformed_payload(&self, source: &str) {
        self.search_metrics
            .malformed_payloads_total
            .with_label_values(&[source])
            .inc();
    }

    /// Update the pool size gauge
    pub fn update_pool_size(&self, size: usize) {
        self.search_metrics.pool_size.set(size as i64);
    }

    /// Record a committed pairing
    pub fn record_pairing(&self, mode: SearchMode, source: PairingSource) {
        self.pairing_metrics
            .pairings_total
            .with_label_values(&[mode.as_str(), source.as_str()])
            .inc();
    }

    /// Record a lock that was already held
    pub fn record_lock_contention(&self, target: &str) {
        self.pairing_metrics
            .lock_contention_total
            .with_label_values(&[target])
            .inc();
    }

    /// Record a nearby attempt falling back to random
    pub fn record_nearby_fallback(&self) {
        self.pairing_metrics.nearby_fallbacks_total.inc();
    }

    /// Record a failed collaborator call
    pub fn record_collaborator_error(&self, operation: &str) {
        self.pairing_metrics
            .collaborator_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record an undeliverable notification
    pub fn record_notification_failure(&self) {
        self.pairing_metrics.notification_failures_total.inc();
    }

    pub fn record_session_ended(&self) {
        self.pairing_metrics.sessions_ended_total.inc();
    }

    /// Record the duration of a match attempt
    pub fn record_match_attempt(&self, mode: SearchMode, duration: Duration) {
        self.performance_metrics
            .match_attempt_duration
            .with_label_values(&[mode.as_str()])
            .observe(duration.as_secs_f64());
    }

    /// Record the duration of a reconciliation sweep
    pub fn record_sweep(&self, duration: Duration) {
        self.performance_metrics
            .sweep_duration
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Summarise the counters for the stats endpoint
    pub fn stats(&self) -> MatchingStats {
        let modes = [SearchMode::Random, SearchMode::Nearby];
        let pairings = |source: PairingSource| -> u64 {
            modes
                .iter()
                .map(|mode| {
                    self.pairing_metrics
                        .pairings_total
                        .with_label_values(&[mode.as_str(), source.as_str()])
                        .get()
                })
                .sum()
        };

        MatchingStats {
            pool_size: self.search_metrics.pool_size.get(),
            searches_submitted: modes
                .iter()
                .map(|mode| {
                    self.search_metrics
                        .searches_submitted_total
                        .with_label_values(&[mode.as_str()])
                        .get()
                })
                .sum(),
            withdrawals: self.search_metrics.withdrawals_total.get(),
            pairings_by_worker: pairings(PairingSource::Worker),
            pairings_by_sweep: pairings(PairingSource::Sweep),
            evictions: EvictionReason::ALL
                .iter()
                .map(|reason| {
                    self.search_metrics
                        .evictions_total
                        .with_label_values(&[reason.as_str()])
                        .get()
                })
                .sum(),
            lock_contention: ["self", "candidate"]
                .iter()
                .map(|target| {
                    self.pairing_metrics
                        .lock_contention_total
                        .with_label_values(&[*target])
                        .get()
                })
                .sum(),
            malformed_payloads: ["broadcast", "command"]
                .iter()
                .map(|source| {
                    self.search_metrics
                        .malformed_payloads_total
                        .with_label_values(&[*source])
                        .get()
                })
                .sum(),
            notification_failures: self.pairing_metrics.notification_failures_total.get(),
            sessions_ended: self.pairing_metrics.sessions_ended_total.get(),
        }
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("rendezvous_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("rendezvous_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "rendezvous_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("rendezvous_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl SearchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let searches_submitted_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_searches_submitted_total",
                "Total search submissions",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(searches_submitted_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("rendezvous_withdrawals_total", "Total search withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let pool_size = IntGauge::new(
            "rendezvous_pool_size",
            "Participants currently in the searching pool",
        )?;
        registry.register(Box::new(pool_size.clone()))?;

        let evictions_total = IntCounterVec::new(
            Opts::new("rendezvous_evictions_total", "Searching pool evictions"),
            &["reason"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let malformed_payloads_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_malformed_payloads_total",
                "Payloads dropped because they could not be decoded",
            ),
            &["source"],
        )?;
        registry.register(Box::new(malformed_payloads_total.clone()))?;

        Ok(Self {
            searches_submitted_total,
            withdrawals_total,
            pool_size,
            evictions_total,
            malformed_payloads_total,
        })
    }
}

impl PairingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairings_total = IntCounterVec::new(
            Opts::new("rendezvous_pairings_total", "Total committed pairings"),
            &["mode", "source"],
        )?;
        registry.register(Box::new(pairings_total.clone()))?;

        let lock_contention_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_lock_contention_total",
                "Lock acquisitions that found the lock already held",
            ),
            &["target"],
        )?;
        registry.register(Box::new(lock_contention_total.clone()))?;

        let nearby_fallbacks_total = IntCounter::new(
            "rendezvous_nearby_fallbacks_total",
            "Nearby searches re-dispatched as random",
        )?;
        registry.register(Box::new(nearby_fallbacks_total.clone()))?;

        let collaborator_errors_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_collaborator_errors_total",
                "Failed calls to external collaborators",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(collaborator_errors_total.clone()))?;

        let notification_failures_total = IntCounter::new(
            "rendezvous_notification_failures_total",
            "Match notifications that could not be delivered",
        )?;
        registry.register(Box::new(notification_failures_total.clone()))?;

        let sessions_ended_total = IntCounter::new(
            "rendezvous_sessions_ended_total",
            "Chat sessions ended by a participant",
        )?;
        registry.register(Box::new(sessions_ended_total.clone()))?;

        Ok(Self {
            pairings_total,
            lock_contention_total,
            nearby_fallbacks_total,
            collaborator_errors_total,
            notification_failures_total,
            sessions_ended_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_attempt_duration = HistogramVec::new(
            HistogramOpts::new(
                "rendezvous_match_attempt_duration_seconds",
                "Event-driven match attempt duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["mode"],
        )?;
        registry.register(Box::new(match_attempt_duration.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "rendezvous_sweep_duration_seconds",
                "Reconciliation sweep duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "rendezvous_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            match_attempt_duration,
            sweep_duration,
            amqp_operation_duration,
        })
    }
}
