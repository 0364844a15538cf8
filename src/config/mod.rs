//! Configuration management for the pairing service
//!
//! Loads configuration from defaults, an optional TOML file and environment
//! variables, then validates it.

pub mod app;

pub use app::{
    validate_config, AmqpSettings, AppConfig, MatchingSettings, ServiceSettings, StoreSettings,
    MEMORY_STORE_URL,
};
