//! Entry point for search intents
//!
//! Enrols a participant in the searching pool and broadcasts the intent to the
//! match workers listening on the channel for its mode.

use crate::bus::{self, SearchBus};
use crate::error::{MatchError, Result};
use crate::matching::PairingEngine;
use crate::metrics::collector::EvictionReason;
use crate::types::{SearchMode, SearchRecord, SearchRequest};
use crate::utils;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    engine: Arc<PairingEngine>,
    bus: Arc<dyn SearchBus>,
}

impl Dispatcher {
    pub fn new(engine: Arc<PairingEngine>, bus: Arc<dyn SearchBus>) -> Self {
        Self { engine, bus }
    }

    pub fn engine(&self) -> &Arc<PairingEngine> {
        &self.engine
    }

    /// Enrol the participant and broadcast their intent.
    ///
    /// Calling this again for a participant who is already searching refreshes
    /// the record TTL and broadcasts again. Fails without enrolling when the
    /// shared store cannot be reached. A broadcast failure after enrolment is
    /// only logged: the reconciliation sweep still sees the participant.
    pub async fn submit(&self, request: SearchRequest) -> Result<SearchRecord> {
        if request.participant_id.trim().is_empty() {
            return Err(MatchError::InvalidSearchRequest {
                reason: "participant id cannot be empty".to_string(),
            }
            .into());
        }

        let record = request.into_record(utils::current_timestamp());
        let payload = encode(&record)?;

        let ttl = self.engine.settings().record_ttl;
        self.engine
            .bounded("pool_enroll", self.engine.pool().enroll(record.clone(), ttl))
            .await?;

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_search_submitted(record.mode);
        }

        let channel = bus::channel_for(record.mode);
        match self
            .engine
            .bounded("bus_publish", self.bus.publish(channel, payload))
            .await
        {
            Ok(()) => info!(
                participant_id = %record.participant_id,
                mode = %record.mode,
                located = record.coordinates().is_some(),
                "Search submitted"
            ),
            Err(e) => warn!(
                participant_id = %record.participant_id,
                channel,
                "Enrolled but broadcast failed, waiting for sweep: {}", e
            ),
        }

        Ok(record)
    }

    /// Remove the participant from the pool. Unknown participants are a no-op.
    pub async fn withdraw(&self, participant_id: &str) -> Result<bool> {
        let removed = self
            .engine
            .evict(participant_id, EvictionReason::Withdrawn)
            .await?;

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_withdrawal();
        }

        if removed {
            info!(participant_id, "Search withdrawn");
        } else {
            debug!(participant_id, "Withdraw for participant not in pool");
        }
        Ok(removed)
    }

    /// Broadcast an already enrolled record on the channel for `mode`
    pub async fn redispatch(&self, record: &SearchRecord, mode: SearchMode) -> Result<()> {
        redispatch(self.bus.as_ref(), &self.engine, record, mode).await
    }
}

/// Publish `record` as a `mode` intent without touching the pool
pub(crate) async fn redispatch(
    bus: &dyn SearchBus,
    engine: &PairingEngine,
    record: &SearchRecord,
    mode: SearchMode,
) -> Result<()> {
    let mut intent = record.clone();
    intent.mode = mode;
    let payload = encode(&intent)?;

    engine
        .bounded("bus_publish", bus.publish(bus::channel_for(mode), payload))
        .await
}

fn encode(record: &SearchRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| {
        MatchError::InternalError {
            message: format!("Failed to serialize search record: {}", e),
        }
        .into()
    })
}
