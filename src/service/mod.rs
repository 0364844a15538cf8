//! Service layer for the pairing service
//!
//! Application state, component wiring and health checks.

pub mod app;
pub mod backend;
pub mod health;

pub use app::{spawn_workers, AppState, ProductionCommandHandler, ServiceError};
pub use backend::Backend;
pub use health::{ComponentCheck, HealthCheck, HealthReport, HealthStatus};
