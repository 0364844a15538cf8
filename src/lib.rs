//! Rendezvous - anonymous one-on-one chat partner matching
//!
//! Participants searching for a partner are enrolled in a shared pool and
//! their intent is broadcast to match workers, which pair them at random or
//! by proximity under per-participant locks. A periodic reconciliation sweep
//! repairs whatever the event-driven path missed.

pub mod amqp;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod geo;
pub mod matching;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod workers;

pub use error::{MatchError, Result};
pub use types::*;

pub use bus::{InMemorySearchBus, SearchBus};
pub use collaborators::{Notifier, SessionStore, StatusStore};
pub use matching::{compatible, MatchSettings, PairingEngine};
pub use service::Backend;
pub use store::{InMemorySearchStore, LockManager, RedisSearchStore, SearchPool};
pub use workers::{Dispatcher, JanitorWorker, MatchWorker, ReconciliationWorker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
