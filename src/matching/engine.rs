//! Pairing engine shared by the match workers and the reconciliation sweep
//!
//! Wraps the shared store and the collaborators behind bounded calls and
//! implements the commit step: create the session, drop both participants
//! from the pool and notify them. Callers own the locking protocol.

use crate::collaborators::{EndedSession, Notifier, SessionStore, StatusStore};
use crate::error::{MatchError, Result};
use crate::metrics::collector::{EvictionReason, PairingSource};
use crate::metrics::MetricsCollector;
use crate::store::{LockManager, MatchLock, SearchPool};
use crate::types::{
    MatchNotification, ParticipantId, ParticipantStatus, PartnerLeftNotification, SearchMode,
    SearchRecord, SessionId,
};
use crate::utils;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables of the matching engine
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    /// Lifetime of a search record
    pub record_ttl: Duration,
    /// Lifetime of a match lock
    pub lock_ttl: Duration,
    /// Upper bound for any single shared-store call
    pub store_timeout: Duration,
    /// Nearby candidates farther than this are not considered
    pub nearby_max_distance_km: f64,
    /// Re-dispatch unmatched nearby searches as random
    pub nearby_fallback_to_random: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(10),
            store_timeout: Duration::from_millis(2000),
            nearby_max_distance_km: 50.0,
            nearby_fallback_to_random: true,
        }
    }
}

/// Handles on the shared state plus the commit logic
pub struct PairingEngine {
    pool: Arc<dyn SearchPool>,
    locks: Arc<dyn LockManager>,
    statuses: Arc<dyn StatusStore>,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Option<Arc<MetricsCollector>>,
    settings: MatchSettings,
}

impl PairingEngine {
    pub fn new(
        pool: Arc<dyn SearchPool>,
        locks: Arc<dyn LockManager>,
        statuses: Arc<dyn StatusStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            pool,
            locks,
            statuses,
            sessions,
            notifier,
            metrics: None,
            settings,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    pub fn pool(&self) -> &Arc<dyn SearchPool> {
        &self.pool
    }

    pub fn locks(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    /// Run a collaborator call under the store timeout, counting failures
    pub async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match tokio::time::timeout(self.settings.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(MatchError::StoreTimeout {
                operation: operation.to_string(),
            }
            .into()),
        };

        if outcome.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.record_collaborator_error(operation);
            }
        }
        outcome
    }

    /// Try to take the lock on a participant. `role` labels contention metrics.
    pub async fn acquire(
        &self,
        participant_id: &str,
        role: &'static str,
    ) -> Result<Option<MatchLock>> {
        let lock = self
            .bounded(
                "lock_acquire",
                self.locks.try_acquire(participant_id, self.settings.lock_ttl),
            )
            .await?;

        if lock.is_none() {
            debug!(participant_id, role, "Lock already held");
            if let Some(metrics) = &self.metrics {
                metrics.record_lock_contention(role);
            }
        }
        Ok(lock)
    }

    /// Release a lock; failures are logged and left to the lock TTL
    pub async fn release(&self, lock: MatchLock) {
        match self.bounded("lock_release", self.locks.release(&lock)).await {
            Ok(true) => {}
            Ok(false) => debug!(
                participant_id = %lock.participant_id,
                "Lock had already expired or changed owner"
            ),
            Err(e) => warn!(
                participant_id = %lock.participant_id,
                "Failed to release lock, relying on expiry: {}", e
            ),
        }
    }

    /// Whether the durable status store still says the participant is searching
    pub async fn is_searching(&self, participant_id: &str) -> Result<bool> {
        let status = self
            .bounded("status_read", self.statuses.get_status(participant_id))
            .await?;
        Ok(status == ParticipantStatus::Searching)
    }

    /// Remove a participant from the pool
    pub async fn evict(&self, participant_id: &str, reason: EvictionReason) -> Result<bool> {
        let removed = self
            .bounded("pool_evict", self.pool.evict(participant_id))
            .await?;

        if removed {
            debug!(
                participant_id,
                reason = reason.as_str(),
                "Evicted from searching pool"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_eviction(reason);
            }
        }
        Ok(removed)
    }

    /// Current pool members in pool order
    pub async fn members(&self) -> Result<Vec<ParticipantId>> {
        self.bounded("pool_members", self.pool.members()).await
    }

    /// Live record of one member
    pub async fn record(&self, participant_id: &str) -> Result<Option<SearchRecord>> {
        self.bounded("pool_record", self.pool.record(participant_id))
            .await
    }

    /// Records of every pool member except `exclude`, in pool order.
    /// Members whose record has already expired are skipped.
    pub async fn candidates(&self, exclude: &str) -> Result<Vec<SearchRecord>> {
        let members = self.members().await?;
        let mut candidates = Vec::with_capacity(members.len());

        for id in members.iter().filter(|id| id.as_str() != exclude) {
            if let Some(record) = self.record(id).await? {
                candidates.push(record);
            }
        }
        Ok(candidates)
    }

    /// Commit a pairing between two locked participants.
    ///
    /// Both locks must be held by the caller. On success both participants
    /// leave the pool and are notified; eviction and notification failures
    /// are logged but do not undo the session.
    pub async fn commit(
        &self,
        first: &SearchRecord,
        second: &SearchRecord,
        mode: SearchMode,
        distance_km: Option<f64>,
        source: PairingSource,
    ) -> Result<SessionId> {
        let session_id = self
            .bounded(
                "create_pairing",
                self.sessions
                    .create_pairing(&first.participant_id, &second.participant_id),
            )
            .await?;

        for id in [&first.participant_id, &second.participant_id] {
            if let Err(e) = self.evict(id, EvictionReason::Paired).await {
                warn!(participant_id = %id, "Paired participant left in pool: {}", e);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_pairing(mode, source);
        }

        info!(
            first = %first.participant_id,
            second = %second.participant_id,
            %session_id,
            %mode,
            distance_km = ?distance_km,
            source = source.as_str(),
            "Pairing committed"
        );

        let matched_at = utils::current_timestamp();
        for (me, partner) in [(first, second), (second, first)] {
            let notification = MatchNotification {
                participant_id: me.participant_id.clone(),
                partner_id: partner.participant_id.clone(),
                session_id,
                mode,
                distance_km,
                matched_at,
            };
            self.notify(notification).await;
        }

        Ok(session_id)
    }

    /// Close the participant's session and tell the partner they were left.
    ///
    /// Both sides return to `Idle`. Returns `None` when there was no session.
    pub async fn end_session(&self, participant_id: &str) -> Result<Option<EndedSession>> {
        let ended = self
            .bounded("end_session", self.sessions.end_session(participant_id))
            .await?;

        let Some(ended) = ended else {
            debug!(participant_id, "No session to end");
            return Ok(None);
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_session_ended();
        }
        info!(
            participant_id,
            partner_id = %ended.partner_id,
            session_id = %ended.session_id,
            "Session ended"
        );

        let notification = PartnerLeftNotification {
            participant_id: ended.partner_id.clone(),
            session_id: ended.session_id,
            ended_at: utils::current_timestamp(),
        };
        let outcome = self
            .bounded("notify", self.notifier.partner_left(notification))
            .await;
        if let Err(e) = outcome {
            warn!(partner_id = %ended.partner_id, "Failed to deliver partner-left notification: {}", e);
            if let Some(metrics) = &self.metrics {
                metrics.record_notification_failure();
            }
        }

        Ok(Some(ended))
    }

    async fn notify(&self, notification: MatchNotification) {
        let participant_id = notification.participant_id.clone();
        let outcome = match tokio::time::timeout(
            self.settings.store_timeout,
            self.notifier.notify(notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MatchError::StoreTimeout {
                operation: "notify".to_string(),
            }
            .into()),
        };

        if let Err(e) = outcome {
            warn!(%participant_id, "Failed to deliver match notification: {}", e);
            if let Some(metrics) = &self.metrics {
                metrics.record_notification_failure();
            }
        }
    }
}
