//! In-process collaborator implementations
//!
//! Used when the service runs standalone and throughout the test suite.

use super::{EndedSession, Notifier, SessionStore, StatusStore};
use crate::error::{MatchError, Result};
use crate::geo;
use crate::types::{
    MatchNotification, ParticipantId, ParticipantStatus, PartnerLeftNotification, SessionId,
};
use crate::utils;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::info;

/// A committed chat session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub participants: (ParticipantId, ParticipantId),
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Directory {
    statuses: HashMap<ParticipantId, ParticipantStatus>,
    partners: HashMap<ParticipantId, ParticipantId>,
    active_sessions: HashMap<SessionId, Session>,
    /// Every session ever committed, in commit order
    history: Vec<Session>,
}

/// Status and session store sharing a single table so pairings commit atomically
#[derive(Debug, Default)]
pub struct InMemoryParticipantStore {
    directory: Mutex<Directory>,
}

impl InMemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn directory(&self) -> Result<std::sync::MutexGuard<'_, Directory>> {
        self.directory.lock().map_err(|_| {
            MatchError::InternalError {
                message: "Failed to acquire participant directory lock".to_string(),
            }
            .into()
        })
    }

    /// All sessions committed so far, in commit order
    pub fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.directory()?.history.clone())
    }

    /// Number of sessions currently open
    pub fn active_session_count(&self) -> Result<usize> {
        Ok(self.directory()?.active_sessions.len())
    }
}

#[async_trait]
impl StatusStore for InMemoryParticipantStore {
    async fn get_status(&self, participant_id: &str) -> Result<ParticipantStatus> {
        Ok(self
            .directory()?
            .statuses
            .get(participant_id)
            .copied()
            .unwrap_or_default())
    }

    async fn set_status(&self, participant_id: &str, status: ParticipantStatus) -> Result<()> {
        self.directory()?
            .statuses
            .insert(participant_id.to_string(), status);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryParticipantStore {
    async fn create_pairing(&self, a: &str, b: &str) -> Result<SessionId> {
        if a == b {
            return Err(MatchError::SessionCommitFailed {
                reason: format!("participant {} cannot be paired with themselves", a),
            }
            .into());
        }

        let mut directory = self.directory()?;

        for id in [a, b] {
            let status = directory.statuses.get(id).copied().unwrap_or_default();
            if status != ParticipantStatus::Searching {
                return Err(MatchError::ParticipantNotSearching {
                    participant_id: id.to_string(),
                }
                .into());
            }
        }

        let session = Session {
            id: utils::generate_session_id(),
            participants: (a.to_string(), b.to_string()),
            started_at: utils::current_timestamp(),
        };

        directory
            .statuses
            .insert(a.to_string(), ParticipantStatus::Chatting);
        directory
            .statuses
            .insert(b.to_string(), ParticipantStatus::Chatting);
        directory.partners.insert(a.to_string(), b.to_string());
        directory.partners.insert(b.to_string(), a.to_string());
        directory.history.push(session.clone());
        directory.active_sessions.insert(session.id, session.clone());

        Ok(session.id)
    }

    async fn partner_of(&self, participant_id: &str) -> Result<Option<ParticipantId>> {
        Ok(self.directory()?.partners.get(participant_id).cloned())
    }

    async fn end_session(&self, participant_id: &str) -> Result<Option<EndedSession>> {
        let mut directory = self.directory()?;

        let Some(partner) = directory.partners.remove(participant_id) else {
            return Ok(None);
        };
        directory.partners.remove(&partner);
        directory
            .statuses
            .insert(participant_id.to_string(), ParticipantStatus::Idle);
        directory
            .statuses
            .insert(partner.clone(), ParticipantStatus::Idle);

        let session_id = directory
            .active_sessions
            .values()
            .find(|s| {
                (s.participants.0 == participant_id && s.participants.1 == partner)
                    || (s.participants.1 == participant_id && s.participants.0 == partner)
            })
            .map(|s| s.id);
        if let Some(id) = session_id {
            directory.active_sessions.remove(&id);
        }

        Ok(session_id.map(|session_id| EndedSession {
            session_id,
            partner_id: partner,
        }))
    }
}

/// Notifier that logs every event and keeps a bounded history of them
#[derive(Debug)]
pub struct InMemoryNotifier {
    delivered: Mutex<VecDeque<MatchNotification>>,
    departures: Mutex<VecDeque<PartnerLeftNotification>>,
    history_limit: usize,
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl InMemoryNotifier {
    pub fn new(history_limit: usize) -> Self {
        Self {
            delivered: Mutex::new(VecDeque::new()),
            departures: Mutex::new(VecDeque::new()),
            history_limit,
        }
    }

    /// Notifications delivered so far, oldest first
    pub fn delivered(&self) -> Vec<MatchNotification> {
        self.delivered
            .lock()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Notifications addressed to one participant
    pub fn delivered_to(&self, participant_id: &str) -> Vec<MatchNotification> {
        self.delivered()
            .into_iter()
            .filter(|n| n.participant_id == participant_id)
            .collect()
    }

    /// Partner-left events delivered to one participant
    pub fn departures_to(&self, participant_id: &str) -> Vec<PartnerLeftNotification> {
        self.departures
            .lock()
            .map(|d| {
                d.iter()
                    .filter(|n| n.participant_id == participant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: MatchNotification) -> Result<()> {
        let distance = notification
            .distance_km
            .map(geo::format_distance)
            .unwrap_or_else(|| "-".to_string());
        info!(
            participant_id = %notification.participant_id,
            partner_id = %notification.partner_id,
            session_id = %notification.session_id,
            mode = %notification.mode,
            distance = %distance,
            "Partner found"
        );

        let mut delivered = self
            .delivered
            .lock()
            .map_err(|_| MatchError::InternalError {
                message: "Failed to acquire notification history lock".to_string(),
            })?;
        if delivered.len() >= self.history_limit {
            delivered.pop_front();
        }
        delivered.push_back(notification);
        Ok(())
    }

    async fn partner_left(&self, notification: PartnerLeftNotification) -> Result<()> {
        info!(
            participant_id = %notification.participant_id,
            session_id = %notification.session_id,
            "Partner left the chat"
        );

        let mut departures = self
            .departures
            .lock()
            .map_err(|_| MatchError::InternalError {
                message: "Failed to acquire departure history lock".to_string(),
            })?;
        if departures.len() >= self.history_limit {
            departures.pop_front();
        }
        departures.push_back(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchMode;

    #[tokio::test]
    async fn test_unknown_participant_is_idle() {
        let store = InMemoryParticipantStore::new();
        assert_eq!(
            store.get_status("ghost").await.unwrap(),
            ParticipantStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_create_pairing_commits_everything() {
        let store = InMemoryParticipantStore::new();
        store
            .set_status("a", ParticipantStatus::Searching)
            .await
            .unwrap();
        store
            .set_status("b", ParticipantStatus::Searching)
            .await
            .unwrap();

        let session_id = store.create_pairing("a", "b").await.unwrap();

        assert_eq!(
            store.get_status("a").await.unwrap(),
            ParticipantStatus::Chatting
        );
        assert_eq!(
            store.get_status("b").await.unwrap(),
            ParticipantStatus::Chatting
        );
        assert_eq!(store.partner_of("a").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.partner_of("b").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.sessions().unwrap()[0].id, session_id);
    }

    #[tokio::test]
    async fn test_create_pairing_refuses_non_searching() {
        let store = InMemoryParticipantStore::new();
        store
            .set_status("a", ParticipantStatus::Searching)
            .await
            .unwrap();
        store.set_status("b", ParticipantStatus::Idle).await.unwrap();

        let err = store.create_pairing("a", "b").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchError>(),
            Some(MatchError::ParticipantNotSearching { participant_id }) if participant_id == "b"
        ));

        // Nothing was written
        assert_eq!(
            store.get_status("a").await.unwrap(),
            ParticipantStatus::Searching
        );
        assert!(store.partner_of("a").await.unwrap().is_none());
        assert!(store.sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_pairing_of_same_participant_is_refused() {
        let store = InMemoryParticipantStore::new();
        for id in ["a", "b", "c"] {
            store
                .set_status(id, ParticipantStatus::Searching)
                .await
                .unwrap();
        }

        store.create_pairing("a", "b").await.unwrap();
        assert!(store.create_pairing("c", "a").await.is_err());
        assert!(store.create_pairing("a", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_end_session_resets_both_sides() {
        let store = InMemoryParticipantStore::new();
        store
            .set_status("a", ParticipantStatus::Searching)
            .await
            .unwrap();
        store
            .set_status("b", ParticipantStatus::Searching)
            .await
            .unwrap();
        let session_id = store.create_pairing("a", "b").await.unwrap();

        assert_eq!(
            store.end_session("b").await.unwrap(),
            Some(EndedSession {
                session_id,
                partner_id: "a".to_string(),
            })
        );
        assert_eq!(store.get_status("a").await.unwrap(), ParticipantStatus::Idle);
        assert!(store.partner_of("a").await.unwrap().is_none());
        assert_eq!(store.active_session_count().unwrap(), 0);
        assert_eq!(store.end_session("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_notifier_history_is_bounded() {
        let notifier = InMemoryNotifier::new(2);
        for i in 0..3 {
            notifier
                .notify(MatchNotification {
                    participant_id: format!("p{}", i),
                    partner_id: "x".to_string(),
                    session_id: utils::generate_session_id(),
                    mode: SearchMode::Random,
                    distance_km: None,
                    matched_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let delivered = notifier.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].participant_id, "p1");
        assert_eq!(notifier.delivered_to("p2").len(), 1);
    }
}
