//! Event-driven match worker, one per search channel
//!
//! For every broadcast intent the worker locks the requester, re-checks that
//! they still want a partner, walks the ranked candidates and commits the
//! first one it can lock, verify and accept. Every lock it takes is released
//! before the attempt returns.

use super::dispatcher;
use crate::bus::{self, SearchBus, Subscription};
use crate::error::{MatchError, Result};
use crate::matching::ranking::{rank_candidates, RankedCandidate, RankingPolicy};
use crate::matching::{compatible, PairingEngine};
use crate::metrics::collector::{EvictionReason, PairingSource};
use crate::types::{ParticipantId, SearchMode, SearchRecord, SessionId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// How a single match attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// A session was committed
    Paired {
        partner_id: ParticipantId,
        session_id: SessionId,
        distance_km: Option<f64>,
    },
    /// Another attempt already holds the requester
    Contended,
    /// The requester is no longer searching and was evicted
    NotSearching,
    /// No candidate could be paired; the requester stays in the pool
    NoPartner,
    /// Nearby found nobody and the intent was re-broadcast as random
    FellBack,
}

/// Listener for one broadcast channel
pub struct MatchWorker {
    mode: SearchMode,
    engine: Arc<PairingEngine>,
    bus: Arc<dyn SearchBus>,
}

impl MatchWorker {
    pub fn new(mode: SearchMode, engine: Arc<PairingEngine>, bus: Arc<dyn SearchBus>) -> Self {
        Self { mode, engine, bus }
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Subscribe to this worker's channel
    pub async fn subscribe(&self) -> Result<Subscription> {
        self.bus.subscribe(bus::channel_for(self.mode)).await
    }

    /// Process broadcasts until the subscription ends or shutdown is signalled
    pub async fn run(self, mut subscription: Subscription, mut shutdown: broadcast::Receiver<()>) {
        info!("{} match worker started", self.mode);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("{} match worker received shutdown signal", self.mode);
                    break;
                }
                next = subscription.next() => match next {
                    Some(payload) => {
                        self.handle_payload(&payload).await;
                    }
                    None => {
                        warn!("{} subscription closed", self.mode);
                        break;
                    }
                }
            }
        }

        info!("{} match worker stopped", self.mode);
    }

    /// Decode and process one broadcast payload. Malformed payloads are dropped.
    pub async fn handle_payload(&self, payload: &[u8]) -> Option<AttemptOutcome> {
        let request: SearchRecord = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                let err = MatchError::MalformedPayload {
                    reason: e.to_string(),
                };
                warn!(
                    channel = bus::channel_for(self.mode),
                    size = payload.len(),
                    "Dropping broadcast: {}",
                    err
                );
                if let Some(metrics) = self.engine.metrics() {
                    metrics.record_malformed_payload("broadcast");
                }
                return None;
            }
        };

        let timer = Instant::now();
        let participant_id = request.participant_id.clone();
        let outcome = match self.attempt(request).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    %participant_id,
                    mode = %self.mode,
                    "Match attempt abandoned, will retry on next broadcast or sweep: {}", e
                );
                None
            }
        };

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_match_attempt(self.mode, timer.elapsed());
        }
        outcome
    }

    /// Run one match attempt for `request`
    pub async fn attempt(&self, request: SearchRecord) -> Result<AttemptOutcome> {
        let Some(self_lock) = self
            .engine
            .acquire(&request.participant_id, "self")
            .await?
        else {
            debug!(
                participant_id = %request.participant_id,
                "Requester already being matched elsewhere"
            );
            return Ok(AttemptOutcome::Contended);
        };

        let policy = self.policy_for(&request);
        let result = self.attempt_locked(&request, policy).await;
        self.engine.release(self_lock).await;

        let outcome = result?;
        let proximity = matches!(policy, RankingPolicy::Proximity { .. });
        if outcome == AttemptOutcome::NoPartner
            && proximity
            && self.engine.settings().nearby_fallback_to_random
        {
            // The self lock is already released so the random worker can take it
            dispatcher::redispatch(self.bus.as_ref(), &self.engine, &request, SearchMode::Random)
                .await?;
            if let Some(metrics) = self.engine.metrics() {
                metrics.record_nearby_fallback();
            }
            info!(
                participant_id = %request.participant_id,
                "No nearby partner, re-dispatched as random"
            );
            return Ok(AttemptOutcome::FellBack);
        }

        Ok(outcome)
    }

    /// Nearby ranks by distance only when the requester has a location
    fn policy_for(&self, request: &SearchRecord) -> RankingPolicy {
        match self.mode {
            SearchMode::Nearby if request.coordinates().is_some() => RankingPolicy::Proximity {
                max_distance_km: self.engine.settings().nearby_max_distance_km,
            },
            SearchMode::Nearby => {
                debug!(
                    participant_id = %request.participant_id,
                    "Requester has no location, matching as random"
                );
                RankingPolicy::PoolOrder
            }
            SearchMode::Random => RankingPolicy::PoolOrder,
        }
    }

    async fn attempt_locked(
        &self,
        request: &SearchRecord,
        policy: RankingPolicy,
    ) -> Result<AttemptOutcome> {
        if !self.engine.is_searching(&request.participant_id).await? {
            self.engine
                .evict(&request.participant_id, EvictionReason::NotSearching)
                .await?;
            debug!(
                participant_id = %request.participant_id,
                "Requester no longer searching, evicted"
            );
            return Ok(AttemptOutcome::NotSearching);
        }

        let candidates = self.engine.candidates(&request.participant_id).await?;
        let ranked = rank_candidates(request.coordinates(), candidates, policy);
        let pairing_mode = match policy {
            RankingPolicy::Proximity { .. } => SearchMode::Nearby,
            RankingPolicy::PoolOrder => SearchMode::Random,
        };

        for candidate in ranked {
            let Some(candidate_lock) = self
                .engine
                .acquire(&candidate.record.participant_id, "candidate")
                .await?
            else {
                continue;
            };

            let result = self.try_candidate(request, &candidate, pairing_mode).await;
            self.engine.release(candidate_lock).await;

            match result? {
                CandidateResult::Paired(session_id) => {
                    return Ok(AttemptOutcome::Paired {
                        partner_id: candidate.record.participant_id,
                        session_id,
                        distance_km: candidate.distance_km,
                    });
                }
                CandidateResult::Skipped => continue,
                CandidateResult::RequesterGone => {
                    self.engine
                        .evict(&request.participant_id, EvictionReason::NotSearching)
                        .await?;
                    return Ok(AttemptOutcome::NotSearching);
                }
            }
        }

        Ok(AttemptOutcome::NoPartner)
    }

    /// Verify and commit one locked candidate
    async fn try_candidate(
        &self,
        request: &SearchRecord,
        candidate: &RankedCandidate,
        mode: SearchMode,
    ) -> Result<CandidateResult> {
        let candidate_id = &candidate.record.participant_id;

        if !self.engine.is_searching(candidate_id).await? {
            self.engine
                .evict(candidate_id, EvictionReason::NotSearching)
                .await?;
            return Ok(CandidateResult::Skipped);
        }

        if !compatible(request, &candidate.record) {
            debug!(
                participant_id = %request.participant_id,
                %candidate_id,
                "Candidate not compatible"
            );
            return Ok(CandidateResult::Skipped);
        }

        match self
            .engine
            .commit(
                request,
                &candidate.record,
                mode,
                candidate.distance_km,
                PairingSource::Worker,
            )
            .await
        {
            Ok(session_id) => Ok(CandidateResult::Paired(session_id)),
            Err(e) => {
                if let Some(MatchError::ParticipantNotSearching { participant_id }) =
                    e.downcast_ref::<MatchError>()
                {
                    if participant_id == &request.participant_id {
                        return Ok(CandidateResult::RequesterGone);
                    }
                }
                error!(
                    participant_id = %request.participant_id,
                    %candidate_id,
                    "Session commit failed, trying next candidate: {}", e
                );
                Ok(CandidateResult::Skipped)
            }
        }
    }
}

enum CandidateResult {
    Paired(SessionId),
    Skipped,
    /// The session store reports the requester left mid-attempt
    RequesterGone,
}
