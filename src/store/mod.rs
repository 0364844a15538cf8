//! Shared searching-pool state
//!
//! The pool and the per-participant locks live outside any single worker so
//! that every task (and every service instance sharing the backend) sees the
//! same view. Implementations must honour the TTLs they are given: expired
//! records and locks are invisible to readers.

pub mod memory;
pub mod redis;

pub use memory::InMemorySearchStore;
pub use self::redis::{RedisKeys, RedisSearchStore};

use crate::error::Result;
use crate::types::{ParticipantId, SearchRecord};
use async_trait::async_trait;
use std::time::Duration;

/// Registry of participants currently eligible to be matched
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchPool: Send + Sync {
    /// Add the participant to the pool and (re)write their record with a fresh TTL.
    /// Re-enrolling keeps the participant's original position in pool order.
    async fn enroll(&self, record: SearchRecord, ttl: Duration) -> Result<()>;

    /// Remove membership and record. Returns whether anything was removed.
    async fn evict(&self, participant_id: &str) -> Result<bool>;

    /// Current members in pool order
    async fn members(&self) -> Result<Vec<ParticipantId>>;

    /// The live record of a participant, `None` if absent or expired
    async fn record(&self, participant_id: &str) -> Result<Option<SearchRecord>>;

    /// Number of members
    async fn size(&self) -> Result<usize>;

    /// Reclaim memory held by expired records. Returns how many were dropped.
    async fn purge_expired(&self) -> Result<usize>;
}

/// An exclusive, TTL-bounded claim on one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchLock {
    pub participant_id: ParticipantId,
    /// Owner token; only the holder of the matching token may release
    pub token: String,
}

/// Per-participant mutual exclusion for match attempts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the lock if nobody holds a live one. Never waits.
    async fn try_acquire(&self, participant_id: &str, ttl: Duration) -> Result<Option<MatchLock>>;

    /// Release a lock if it is still owned by `lock.token`. Returns whether it was released.
    async fn release(&self, lock: &MatchLock) -> Result<bool>;

    /// Whether a live lock exists for the participant
    async fn is_locked(&self, participant_id: &str) -> Result<bool>;

    /// Reclaim memory held by expired locks. Returns how many were dropped.
    async fn purge_expired_locks(&self) -> Result<usize>;
}
