//! AMQP integration for the pairing service
//!
//! Connection management, the search command consumer and the match event
//! publisher.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{SearchCommandConsumer, SearchCommandHandler};
pub use messages::*;
pub use publisher::{AmqpNotificationPublisher, PublisherConfig};
