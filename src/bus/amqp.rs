//! Broadcast bus over an AMQP direct exchange
//!
//! Each channel name is used as a routing key. Every service instance binds
//! its own exclusive, auto-delete queue per channel, so a payload published by
//! any instance reaches the match workers of all instances.

use super::{SearchBus, Subscription};
use crate::error::{MatchError, Result};
use amqprs::{
    channel::{
        BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
        QueueBindArguments, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Buffered payloads per subscription before the consumer applies backpressure
const SUBSCRIPTION_BUFFER: usize = 256;

/// AMQP-backed search bus
pub struct AmqpSearchBus {
    channel: Channel,
    exchange: String,
    instance_id: String,
}

impl AmqpSearchBus {
    /// Create the bus and make sure the exchange exists
    pub async fn new(channel: Channel, exchange: &str) -> Result<Self> {
        let args = ExchangeDeclareArguments::new(exchange, "direct")
            .durable(true)
            .finish();
        channel.exchange_declare(args).await.map_err(|e| {
            MatchError::AmqpConnectionFailed {
                message: format!("Failed to declare search exchange {}: {}", exchange, e),
            }
        })?;

        info!("Search bus ready on exchange '{}'", exchange);

        Ok(Self {
            channel,
            exchange: exchange.to_string(),
            instance_id: uuid::Uuid::new_v4().simple().to_string(),
        })
    }

    fn queue_name(&self, channel: &str) -> String {
        format!(
            "{}.{}.{}",
            self.exchange,
            channel.replace(':', "."),
            self.instance_id
        )
    }
}

#[async_trait]
impl SearchBus for AmqpSearchBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let args = BasicPublishArguments::new(&self.exchange, channel);
        let mut properties = BasicProperties::default();
        properties.with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchError::AmqpConnectionFailed {
                message: format!("Failed to publish on {}: {}", channel, e),
            })?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let queue = self.queue_name(channel);

        let args = QueueDeclareArguments::new(&queue)
            .exclusive(true)
            .auto_delete(true)
            .finish();
        self.channel.queue_declare(args).await.map_err(|e| {
            MatchError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue, e),
            }
        })?;

        let args = QueueBindArguments::new(&queue, &self.exchange, channel);
        self.channel
            .queue_bind(args)
            .await
            .map_err(|e| MatchError::AmqpConnectionFailed {
                message: format!("Failed to bind queue {} to {}: {}", queue, channel, e),
            })?;

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let consumer_tag = format!("search-bus-{}", uuid::Uuid::new_v4());
        let args = BasicConsumeArguments::new(&queue, &consumer_tag)
            .manual_ack(false)
            .finish();

        self.channel
            .basic_consume(ForwardingConsumer { sender }, args)
            .await
            .map_err(|e| MatchError::AmqpConnectionFailed {
                message: format!("Failed to consume from {}: {}", queue, e),
            })?;

        info!("Subscribed to '{}' via queue '{}'", channel, queue);
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }
}

/// Pushes every delivery into the subscription stream
struct ForwardingConsumer {
    sender: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl AsyncConsumer for ForwardingConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        debug!(
            "Search payload received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            deliver.delivery_tag(),
            deliver.routing_key(),
            content.len()
        );

        if self.sender.send(content).await.is_err() {
            warn!(
                "Subscription for '{}' dropped, discarding payload",
                deliver.routing_key()
            );
        }
    }
}
