//! Interfaces to the systems the matching engine depends on but does not own
//!
//! The durable status store is the source of truth for whether a participant
//! is searching; the session store commits pairings; the notifier tells both
//! participants about their new partner, or one side that the other left.

pub mod memory;
pub mod redis;

pub use self::redis::RedisParticipantStore;
pub use memory::{InMemoryNotifier, InMemoryParticipantStore};

use crate::error::Result;
use crate::types::{
    MatchNotification, ParticipantId, ParticipantStatus, PartnerLeftNotification, SessionId,
};
use async_trait::async_trait;

/// Durable per-participant status
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Current status; unknown participants read as `Idle`
    async fn get_status(&self, participant_id: &str) -> Result<ParticipantStatus>;

    async fn set_status(&self, participant_id: &str, status: ParticipantStatus) -> Result<()>;
}

/// Session persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Commit a session between `a` and `b`.
    ///
    /// The session, both `Chatting` statuses and both partner links are
    /// written as one step. On error nothing was written.
    async fn create_pairing(&self, a: &str, b: &str) -> Result<SessionId>;

    /// Current partner of a participant, if they are in a session
    async fn partner_of(&self, participant_id: &str) -> Result<Option<ParticipantId>>;

    /// End the participant's session, returning both sides to `Idle`.
    /// `None` when the participant had no partner.
    async fn end_session(&self, participant_id: &str) -> Result<Option<EndedSession>>;
}

/// A session that was just closed, seen from the side that closed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    pub session_id: SessionId,
    pub partner_id: ParticipantId,
}

/// Delivery of match events to participants
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: MatchNotification) -> Result<()>;

    async fn partner_left(&self, notification: PartnerLeftNotification) -> Result<()>;
}
