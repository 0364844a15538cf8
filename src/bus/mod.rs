//! Publish/subscribe fan-out of search intents
//!
//! Two logical channels exist, one per search mode. Every subscriber of a
//! channel receives every payload published on it; delivery is best effort
//! and the reconciliation sweep repairs anything lost.

pub mod amqp;
pub mod memory;

pub use amqp::AmqpSearchBus;
pub use memory::InMemorySearchBus;

use crate::error::Result;
use crate::types::SearchMode;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// Channel carrying random-mode search intents
pub const RANDOM_CHANNEL: &str = "search:random";
/// Channel carrying nearby-mode search intents
pub const NEARBY_CHANNEL: &str = "search:nearby";

/// Channel a search intent is broadcast on; determined solely by mode
pub fn channel_for(mode: SearchMode) -> &'static str {
    match mode {
        SearchMode::Random => RANDOM_CHANNEL,
        SearchMode::Nearby => NEARBY_CHANNEL,
    }
}

/// Stream of raw payloads delivered on one channel
pub type Subscription = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Broadcast transport used by the dispatcher and the match workers
#[async_trait]
pub trait SearchBus: Send + Sync {
    /// Publish a payload to every current subscriber of `channel`
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Start receiving payloads published on `channel` from now on
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_selection_follows_mode() {
        assert_eq!(channel_for(SearchMode::Random), "search:random");
        assert_eq!(channel_for(SearchMode::Nearby), "search:nearby");
    }
}
