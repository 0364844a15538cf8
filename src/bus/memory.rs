//! In-process broadcast bus backed by `tokio::sync::broadcast`

use super::{SearchBus, Subscription};
use crate::error::{MatchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Bus delivering payloads to subscribers in the same process
#[derive(Debug)]
pub struct InMemorySearchBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for InMemorySearchBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemorySearchBus {
    /// Create a bus whose per-channel buffer holds `capacity` payloads
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<Vec<u8>>> {
        let mut topics = self.topics.lock().map_err(|_| MatchError::InternalError {
            message: "Failed to acquire bus topics lock".to_string(),
        })?;

        Ok(topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(channel).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl SearchBus for InMemorySearchBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let sender = self.sender(channel)?;
        // No receivers is not an error: the payload is simply not observed
        if sender.send(payload).is_err() {
            debug!(channel, "Published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let receiver = self.sender(channel)?.subscribe();
        let channel = channel.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(payload) => Some(payload),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "Subscriber lagged, payloads skipped");
                None
            }
        });

        Ok(Box::pin(stream))
    }
}
