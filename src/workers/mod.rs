//! Background tasks that move participants through the pool

pub mod dispatcher;
pub mod janitor;
pub mod match_worker;
pub mod reconciler;

pub use dispatcher::Dispatcher;
pub use janitor::{CleanupReport, JanitorWorker};
pub use match_worker::{AttemptOutcome, MatchWorker};
pub use reconciler::{ReconciliationWorker, SweepReport};
