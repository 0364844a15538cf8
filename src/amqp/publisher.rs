//! Match event publisher
//!
//! Delivers `MatchNotification`s and partner-left events to the chat layer
//! through the match events topic exchange.

use crate::amqp::connection::with_backoff;
use crate::amqp::messages::{
    MessageEnvelope, MATCH_EVENTS_EXCHANGE, PARTICIPANT_MATCHED_ROUTING_KEY,
    PARTNER_LEFT_ROUTING_KEY,
};
use crate::collaborators::Notifier;
use crate::error::{MatchError, Result};
use crate::types::{MatchNotification, PartnerLeftNotification};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Skip a notification already delivered for the same session and participant
    pub enable_deduplication: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: MATCH_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
        }
    }
}

/// AMQP-backed `Notifier`
pub struct AmqpNotificationPublisher {
    channel: Channel,
    config: PublisherConfig,
    delivered: Mutex<HashSet<String>>,
}

impl AmqpNotificationPublisher {
    /// Create the publisher and declare the events exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let args = ExchangeDeclareArguments::new(&config.exchange, "topic")
            .durable(true)
            .finish();
        channel.exchange_declare(args).await.map_err(|e| {
            MatchError::AmqpConnectionFailed {
                message: format!("Failed to declare match events exchange: {}", e),
            }
        })?;

        info!("Match event publisher ready on exchange '{}'", config.exchange);

        Ok(Self {
            channel,
            config,
            delivered: Mutex::new(HashSet::new()),
        })
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Sync,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchError::AmqpConnectionFailed {
                message: format!(
                    "Failed to publish {} event: {}",
                    envelope.routing_key, e
                ),
            })?;

        Ok(())
    }

    /// Number of remembered deliveries
    pub fn cached_delivery_count(&self) -> usize {
        self.delivered.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn already_delivered(&self, key: &str) -> Result<bool> {
        let delivered = self.delivered.lock().map_err(|_| MatchError::InternalError {
            message: "Failed to acquire delivery cache lock".to_string(),
        })?;
        Ok(delivered.contains(key))
    }

    fn remember(&self, key: String) -> Result<()> {
        let mut delivered = self.delivered.lock().map_err(|_| MatchError::InternalError {
            message: "Failed to acquire delivery cache lock".to_string(),
        })?;
        delivered.insert(key);
        Ok(())
    }
}

/// Deduplication key of one notification
pub fn delivery_key(notification: &MatchNotification) -> String {
    format!("{}:{}", notification.session_id, notification.participant_id)
}

#[async_trait]
impl Notifier for AmqpNotificationPublisher {
    async fn notify(&self, notification: MatchNotification) -> Result<()> {
        let key = delivery_key(&notification);
        if self.config.enable_deduplication && self.already_delivered(&key)? {
            debug!(delivery = %key, "Match event already published, skipping");
            return Ok(());
        }

        let envelope = MessageEnvelope::new(notification, PARTICIPANT_MATCHED_ROUTING_KEY);
        with_backoff(
            "publish match event",
            self.config.max_retries,
            Duration::from_millis(self.config.retry_delay_ms),
            Duration::from_secs(5),
            || self.try_publish(&envelope),
        )
        .await?;

        if self.config.enable_deduplication {
            self.remember(key)?;
        }

        debug!(
            participant_id = %envelope.payload.participant_id,
            correlation_id = %envelope.correlation_id,
            "Published match event"
        );
        Ok(())
    }

    async fn partner_left(&self, notification: PartnerLeftNotification) -> Result<()> {
        let envelope = MessageEnvelope::new(notification, PARTNER_LEFT_ROUTING_KEY);
        with_backoff(
            "publish partner-left event",
            self.config.max_retries,
            Duration::from_millis(self.config.retry_delay_ms),
            Duration::from_secs(5),
            || self.try_publish(&envelope),
        )
        .await?;

        debug!(
            participant_id = %envelope.payload.participant_id,
            session_id = %envelope.payload.session_id,
            "Published partner-left event"
        );
        Ok(())
    }
}
