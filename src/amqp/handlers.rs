//! Consumer for inbound search commands
//!
//! Decodes `SearchCommand`s from the command queue and hands them to a
//! `SearchCommandHandler`. Undecodable commands are reported to the handler
//! and dropped.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchError, Result};
use crate::types::{SearchCommand, SearchRequest};
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Receiver of decoded search commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchCommandHandler: Send + Sync {
    async fn handle_submit(&self, request: SearchRequest) -> Result<()>;

    async fn handle_withdraw(&self, participant_id: &str) -> Result<()>;

    /// Leave the current chat or cancel the search
    async fn handle_end(&self, participant_id: &str) -> Result<()>;

    /// Leave the current chat and search again with `request`
    async fn handle_next(&self, request: SearchRequest) -> Result<()>;

    /// Called for commands that could not be decoded or processed
    async fn handle_error(&self, error: MatchError, message_data: &[u8]);
}

/// Decode one delivery and route it to the handler
pub async fn process_command(handler: &dyn SearchCommandHandler, content: &[u8]) -> Result<()> {
    let command = MessageUtils::deserialize_search_command(content)?;
    debug!(
        participant_id = command.participant_id(),
        "Search command decoded"
    );

    match command {
        SearchCommand::Withdraw { participant_id } => {
            handler.handle_withdraw(&participant_id).await
        }
        SearchCommand::End { participant_id } => handler.handle_end(&participant_id).await,
        next @ SearchCommand::Next { .. } => match MessageUtils::search_request(next) {
            Some(request) => handler.handle_next(request).await,
            None => Ok(()),
        },
        submit => match MessageUtils::search_request(submit) {
            Some(request) => handler.handle_submit(request).await,
            None => Ok(()),
        },
    }
}

/// Consumer for the search command queue
pub struct SearchCommandConsumer {
    handler: Arc<dyn SearchCommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl SearchCommandConsumer {
    pub fn new(handler: Arc<dyn SearchCommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("search-command-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(false)
            .finish();

        self.channel
            .basic_consume(CommandConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming search commands from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming search commands");
        Ok(())
    }
}

struct CommandConsumer {
    handler: Arc<dyn SearchCommandHandler>,
}

impl CommandConsumer {
    fn new(handler: Arc<dyn SearchCommandHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for CommandConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = std::time::Instant::now();

        match process_command(self.handler.as_ref(), &content).await {
            Ok(()) => debug!(
                delivery_tag,
                processing_ms = start_time.elapsed().as_secs_f64() * 1000.0,
                "Search command processed"
            ),
            Err(e) => {
                error!(
                    delivery_tag,
                    processing_ms = start_time.elapsed().as_secs_f64() * 1000.0,
                    "Search command failed: {}", e
                );
                let error = match e.downcast::<MatchError>() {
                    Ok(known) => known,
                    Err(other) => MatchError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, SearchMode};

    #[tokio::test]
    async fn test_submit_routed_to_handler() {
        let mut handler = MockSearchCommandHandler::new();
        handler
            .expect_handle_submit()
            .withf(|request| {
                request.participant_id == "42"
                    && request.mode == SearchMode::Nearby
                    && request.coordinates == Coordinates::new(1.0, 1.0)
            })
            .times(1)
            .returning(|_| Ok(()));
        handler.expect_handle_withdraw().never();

        let payload = br#"{"type":"Submit","participant_id":"42","mode":"nearby","latitude":1.0,"longitude":1.0}"#;
        process_command(&handler, payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_routed_to_handler() {
        let mut handler = MockSearchCommandHandler::new();
        handler
            .expect_handle_withdraw()
            .withf(|id| id == "42")
            .times(1)
            .returning(|_| Ok(()));
        handler.expect_handle_submit().never();

        process_command(&handler, br#"{"type":"Withdraw","participant_id":"42"}"#)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_and_next_routed_to_handler() {
        let mut handler = MockSearchCommandHandler::new();
        handler
            .expect_handle_end()
            .withf(|id| id == "7")
            .times(1)
            .returning(|_| Ok(()));
        handler
            .expect_handle_next()
            .withf(|request| request.participant_id == "7" && request.mode == SearchMode::Random)
            .times(1)
            .returning(|_| Ok(()));
        handler.expect_handle_submit().never();
        handler.expect_handle_withdraw().never();

        process_command(&handler, br#"{"type":"End","participant_id":"7"}"#)
            .await
            .unwrap();
        process_command(
            &handler,
            br#"{"type":"Next","participant_id":"7","mode":"random"}"#,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_command_never_reaches_handler() {
        let mut handler = MockSearchCommandHandler::new();
        handler.expect_handle_submit().never();
        handler.expect_handle_withdraw().never();

        let err = process_command(&handler, b"not json").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchError>(),
            Some(MatchError::MalformedPayload { .. })
        ));
    }
}
