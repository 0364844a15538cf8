//! Main application state and service coordination
//!
//! Wires the shared store, collaborators, AMQP plumbing and workers together
//! and owns their lifecycle.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{SearchCommandConsumer, SearchCommandHandler};
use crate::amqp::publisher::{AmqpNotificationPublisher, PublisherConfig};
use crate::bus::amqp::AmqpSearchBus;
use crate::bus::SearchBus;
use crate::collaborators::StatusStore;
use crate::config::AppConfig;
use crate::error::{MatchError, Result as MatchResult};
use crate::matching::PairingEngine;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::backend::Backend;
use crate::service::health::HealthCheck;
use crate::types::{ParticipantStatus, SearchMode, SearchRequest};
use crate::workers::{Dispatcher, JanitorWorker, MatchWorker, ReconciliationWorker};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Turns search commands into status updates and dispatcher calls
pub struct ProductionCommandHandler {
    dispatcher: Arc<Dispatcher>,
    statuses: Arc<dyn StatusStore>,
    metrics: Arc<MetricsCollector>,
}

impl ProductionCommandHandler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        statuses: Arc<dyn StatusStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            dispatcher,
            statuses,
            metrics,
        }
    }

    async fn submit(&self, request: SearchRequest) -> MatchResult<()> {
        let participant_id = request.participant_id.clone();
        if self.statuses.get_status(&participant_id).await? == ParticipantStatus::Chatting {
            return Err(MatchError::InvalidSearchRequest {
                reason: format!("participant {} is already chatting", participant_id),
            }
            .into());
        }

        self.statuses
            .set_status(&participant_id, ParticipantStatus::Searching)
            .await?;
        self.dispatcher.submit(request).await?;
        Ok(())
    }

    async fn withdraw(&self, participant_id: &str) -> MatchResult<()> {
        if self.statuses.get_status(participant_id).await? == ParticipantStatus::Searching {
            self.statuses
                .set_status(participant_id, ParticipantStatus::Idle)
                .await?;
        }
        self.dispatcher.withdraw(participant_id).await?;
        Ok(())
    }

    /// Leave the chat if there is one, otherwise cancel a running search.
    ///
    /// Returns whether a session was ended.
    async fn end(&self, participant_id: &str) -> MatchResult<bool> {
        match self.statuses.get_status(participant_id).await? {
            ParticipantStatus::Idle => {
                debug!(participant_id, "End from idle participant ignored");
                Ok(false)
            }
            ParticipantStatus::Searching => {
                self.withdraw(participant_id).await?;
                Ok(false)
            }
            ParticipantStatus::Chatting => {
                let ended = self
                    .dispatcher
                    .engine()
                    .end_session(participant_id)
                    .await?;
                if ended.is_none() {
                    // Chatting without a partner on record
                    self.statuses
                        .set_status(participant_id, ParticipantStatus::Idle)
                        .await?;
                }
                Ok(ended.is_some())
            }
        }
    }

    async fn next(&self, request: SearchRequest) -> MatchResult<()> {
        let participant_id = request.participant_id.clone();
        match self.statuses.get_status(&participant_id).await? {
            ParticipantStatus::Chatting => {
                self.end(&participant_id).await?;
                self.submit(request).await
            }
            ParticipantStatus::Searching => self.withdraw(&participant_id).await,
            ParticipantStatus::Idle => {
                debug!(participant_id = %participant_id, "Next from idle participant ignored");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SearchCommandHandler for ProductionCommandHandler {
    async fn handle_submit(&self, request: SearchRequest) -> MatchResult<()> {
        let start = Instant::now();
        let outcome = self.submit(request).await;
        self.metrics
            .record_amqp_operation("search_submit", outcome.is_ok(), start.elapsed());
        outcome
    }

    async fn handle_withdraw(&self, participant_id: &str) -> MatchResult<()> {
        let start = Instant::now();
        let outcome = self.withdraw(participant_id).await;
        self.metrics
            .record_amqp_operation("search_withdraw", outcome.is_ok(), start.elapsed());
        outcome
    }

    async fn handle_end(&self, participant_id: &str) -> MatchResult<()> {
        let start = Instant::now();
        let outcome = self.end(participant_id).await.map(|_| ());
        self.metrics
            .record_amqp_operation("session_end", outcome.is_ok(), start.elapsed());
        outcome
    }

    async fn handle_next(&self, request: SearchRequest) -> MatchResult<()> {
        let start = Instant::now();
        let outcome = self.next(request).await;
        self.metrics
            .record_amqp_operation("search_next", outcome.is_ok(), start.elapsed());
        outcome
    }

    async fn handle_error(&self, error: MatchError, message_data: &[u8]) {
        if matches!(
            error,
            MatchError::MalformedPayload { .. } | MatchError::InvalidSearchRequest { .. }
        ) {
            self.metrics.record_malformed_payload("command");
        }

        let preview_len = message_data.len().min(100);
        warn!(
            size = message_data.len(),
            preview = %String::from_utf8_lossy(&message_data[..preview_len]),
            "Dropped search command: {}", error
        );
    }
}

/// Subscribe the match workers and spawn them with the periodic workers.
///
/// Every task stops when `shutdown` fires.
pub async fn spawn_workers(
    engine: Arc<PairingEngine>,
    bus: Arc<dyn SearchBus>,
    sweep_interval: Duration,
    janitor_interval: Duration,
    shutdown: &broadcast::Sender<()>,
) -> MatchResult<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(4);

    for mode in [SearchMode::Random, SearchMode::Nearby] {
        let worker = MatchWorker::new(mode, engine.clone(), bus.clone());
        let subscription = worker.subscribe().await?;
        let shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(worker.run(subscription, shutdown_rx)));
    }

    let reconciler = ReconciliationWorker::new(engine.clone(), sweep_interval);
    handles.push(tokio::spawn(reconciler.run(shutdown.subscribe())));

    let janitor = JanitorWorker::new(engine, janitor_interval);
    handles.push(tokio::spawn(janitor.run(shutdown.subscribe())));

    Ok(handles)
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    backend: Backend,
    engine: Arc<PairingEngine>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn SearchBus>,

    amqp_connection: Arc<AmqpConnection>,
    metrics_service: Arc<MetricsService>,
    health_check: Arc<HealthCheck>,

    command_consumer: Option<SearchCommandConsumer>,
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
}

impl AppState {
    /// Connect to the store and the broker and build every component
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} pairing service", config.service.name);

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let backend =
            Backend::from_settings(&config.store)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to connect to the shared store: {}", e),
                })?;

        let publisher_channel = Self::open_channel(&amqp_connection, "publisher").await?;
        let notifier = Arc::new(
            AmqpNotificationPublisher::new(
                publisher_channel,
                PublisherConfig {
                    exchange: config.amqp.events_exchange.clone(),
                    max_retries: config.amqp.max_retry_attempts,
                    retry_delay_ms: config.amqp.retry_delay_ms,
                    ..PublisherConfig::default()
                },
            )
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize match event publisher: {}", e),
            })?,
        );

        let bus_channel = Self::open_channel(&amqp_connection, "search bus").await?;
        let bus: Arc<dyn SearchBus> = Arc::new(
            AmqpSearchBus::new(bus_channel, &config.amqp.search_exchange)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize search bus: {}", e),
                })?,
        );

        let engine = Arc::new(
            backend
                .engine(notifier, config.match_settings())
                .with_metrics(metrics_collector.clone()),
        );
        let dispatcher = Arc::new(Dispatcher::new(engine.clone(), bus.clone()));

        let is_running = Arc::new(AtomicBool::new(false));
        let health_check = Arc::new(
            HealthCheck::new(
                &config.service.name,
                backend.pool.clone(),
                metrics_collector.clone(),
                is_running.clone(),
            )
            .with_amqp(amqp_connection.clone()),
        );

        let health_server = HealthServer::new(
            HealthServerConfig {
                port: config.service.health_port,
                host: "0.0.0.0".to_string(),
            },
            metrics_collector.clone(),
        )
        .with_health_check(health_check.clone());
        let metrics_service = Arc::new(MetricsService::new(
            metrics_collector,
            Arc::new(health_server),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            backend,
            engine,
            dispatcher,
            bus,
            amqp_connection,
            metrics_service,
            health_check,
            command_consumer: None,
            background_tasks: Vec::new(),
            shutdown_tx,
            is_running,
        })
    }

    /// Start the workers, the metrics server and command consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} pairing service", self.config.service.name);

        self.is_running.store(true, Ordering::SeqCst);

        self.start_metrics_service().await;
        self.start_workers().await?;
        self.start_metrics_refresh();
        self.start_command_consumption().await?;

        info!("Pairing service started");
        Ok(())
    }

    /// Stop consuming, signal every task and wait for them to finish
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown");

        self.is_running.store(false, Ordering::SeqCst);

        if let Some(consumer) = self.command_consumer.take() {
            match consumer.stop_consuming().await {
                Ok(()) => info!("Search command consumption stopped"),
                Err(e) => warn!("Failed to stop search command consumer: {}", e),
            }
        }

        // No receivers left is not an error at this point
        let _ = self.shutdown_tx.send(());

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        let final_stats = self.metrics_service.collector().stats();
        info!("Final matching statistics: {:?}", final_stats);
        info!("Shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> Arc<PairingEngine> {
        self.engine.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn health_check(&self) -> Arc<HealthCheck> {
        self.health_check.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let mut amqp_config =
            AmqpConfig::from_url(&config.amqp.url).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;
        amqp_config.max_retries = config.amqp.max_retry_attempts;
        amqp_config.retry_delay_ms = config.amqp.retry_delay_ms;
        amqp_config.connection_timeout_ms = config.amqp_connection_timeout().as_millis() as u64;

        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn open_channel(
        connection: &AmqpConnection,
        purpose: &str,
    ) -> Result<amqprs::channel::Channel, ServiceError> {
        connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open {} channel: {}", purpose, e),
            })
    }

    async fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        self.background_tasks.push(tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        }));

        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Metrics service started on port {}", port);
    }

    async fn start_workers(&mut self) -> Result<(), ServiceError> {
        let handles = spawn_workers(
            self.engine.clone(),
            self.bus.clone(),
            self.config.sweep_interval(),
            self.config.janitor_interval(),
            &self.shutdown_tx,
        )
        .await
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to start match workers: {}", e),
        })?;

        info!("{} matching workers started", handles.len());
        self.background_tasks.extend(handles);
        Ok(())
    }

    /// Keep uptime, pool size and health gauges current
    fn start_metrics_refresh(&mut self) {
        let collector = self.metrics_service.collector();
        let health_check = self.health_check.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.background_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            let started = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        collector
                            .service()
                            .uptime_seconds
                            .set(started.elapsed().as_secs() as i64);
                        // Also refreshes pool size and component health gauges
                        let report = health_check.check().await;
                        debug!(
                            status = %report.status,
                            pool_size = report.stats.pool_size,
                            "Refreshed service metrics"
                        );
                    }
                }
            }

            debug!("Metrics refresh task stopped");
        }));
    }

    async fn start_command_consumption(&mut self) -> Result<(), ServiceError> {
        let channel = Self::open_channel(&self.amqp_connection, "consumer").await?;
        let queue = self.config.amqp.command_queue.clone();

        let args = amqprs::channel::QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;

        let handler = Arc::new(ProductionCommandHandler::new(
            self.dispatcher.clone(),
            self.backend.statuses.clone(),
            self.metrics_service.collector(),
        ));
        let consumer = SearchCommandConsumer::new(handler, channel);
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming search commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        Ok(())
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        let deadline = self.config.shutdown_timeout();
        info!("Waiting up to {:?} for {} tasks", deadline, task_count);

        let wait_all = async {
            for task in self.background_tasks.iter_mut() {
                if let Err(e) = task.await {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        };

        if tokio::time::timeout(deadline, wait_all).await.is_err() {
            warn!("Shutdown timeout elapsed, aborting remaining tasks");
            for task in &self.background_tasks {
                task.abort();
            }
        }
        self.background_tasks.clear();
    }
}
