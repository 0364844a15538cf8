//! Periodic full-pool reconciliation sweep
//!
//! Repairs pairings the event-driven workers missed because broadcasts were
//! lost, duplicated or processed out of order. Each sweep evicts stale
//! members and then greedily pairs the remainder in pool order.

use crate::error::Result;
use crate::geo;
use crate::matching::{compatible, PairingEngine};
use crate::metrics::collector::{EvictionReason, PairingSource};
use crate::types::{SearchMode, SearchRecord};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pool members looked at
    pub examined: usize,
    /// Members evicted as stale
    pub evicted: usize,
    /// Pairings committed
    pub paired: usize,
}

pub struct ReconciliationWorker {
    engine: Arc<PairingEngine>,
    interval: Duration,
}

impl ReconciliationWorker {
    pub fn new(engine: Arc<PairingEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Sweep on every tick until shutdown is signalled
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Reconciliation worker started ({}s interval)",
            self.interval.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Reconciliation worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.paired > 0 || report.evicted > 0 => info!(
                            examined = report.examined,
                            evicted = report.evicted,
                            paired = report.paired,
                            "Reconciliation sweep completed"
                        ),
                        Ok(report) => debug!(examined = report.examined, "Reconciliation sweep found nothing to do"),
                        Err(e) => warn!("Reconciliation sweep abandoned: {}", e),
                    }
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// Run one sweep over the whole pool
    pub async fn sweep(&self) -> Result<SweepReport> {
        let timer = Instant::now();
        let mut report = SweepReport::default();

        let members = self.engine.members().await?;
        report.examined = members.len();

        let mut eligible = Vec::with_capacity(members.len());
        for id in &members {
            match self.classify(id).await {
                Ok(Some(record)) => eligible.push(record),
                Ok(None) => report.evicted += 1,
                Err(e) => warn!(participant_id = %id, "Skipping member this sweep: {}", e),
            }
        }

        let mut matched: HashSet<usize> = HashSet::new();
        for i in 0..eligible.len() {
            if matched.contains(&i) {
                continue;
            }
            if let Some(j) = self.pair_first_available(&eligible, i, &matched).await {
                matched.insert(i);
                matched.insert(j);
                report.paired += 1;
            }
        }

        if let Some(metrics) = self.engine.metrics() {
            metrics.record_sweep(timer.elapsed());
        }
        Ok(report)
    }

    /// Live record of a searching member, or `None` after evicting a stale one
    async fn classify(&self, participant_id: &str) -> Result<Option<SearchRecord>> {
        if !self.engine.is_searching(participant_id).await? {
            self.engine
                .evict(participant_id, EvictionReason::NotSearching)
                .await?;
            return Ok(None);
        }

        match self.engine.record(participant_id).await? {
            Some(record) => Ok(Some(record)),
            None => {
                self.engine
                    .evict(participant_id, EvictionReason::RecordExpired)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Scan forward from `i` for the first partner that can be locked, verified
    /// and accepted. Returns the partner's index once a session is committed.
    async fn pair_first_available(
        &self,
        eligible: &[SearchRecord],
        i: usize,
        matched: &HashSet<usize>,
    ) -> Option<usize> {
        let first = &eligible[i];
        let first_lock = match self.engine.acquire(&first.participant_id, "self").await {
            Ok(Some(lock)) => lock,
            Ok(None) => return None,
            Err(e) => {
                warn!(participant_id = %first.participant_id, "Lock acquire failed: {}", e);
                return None;
            }
        };

        let mut partner = None;
        // Re-check under the lock; the status may have changed since classification
        if let Ok(true) = self.engine.is_searching(&first.participant_id).await {
            for (j, second) in eligible.iter().enumerate().skip(i + 1) {
                if matched.contains(&j) || !compatible(first, second) {
                    continue;
                }
                if self.try_pair(first, second).await {
                    partner = Some(j);
                    break;
                }
            }
        }

        self.engine.release(first_lock).await;
        partner
    }

    /// Lock, verify and commit one pair; `first` must already be locked
    async fn try_pair(&self, first: &SearchRecord, second: &SearchRecord) -> bool {
        let second_lock = match self.engine.acquire(&second.participant_id, "candidate").await {
            Ok(Some(lock)) => lock,
            Ok(None) => return false,
            Err(e) => {
                warn!(participant_id = %second.participant_id, "Lock acquire failed: {}", e);
                return false;
            }
        };

        let committed = match self.engine.is_searching(&second.participant_id).await {
            Ok(true) => {
                let distance_km = geo::distance_between(first.coordinates(), second.coordinates());
                let mode = if first.mode == SearchMode::Nearby
                    && second.mode == SearchMode::Nearby
                    && distance_km.is_some()
                {
                    SearchMode::Nearby
                } else {
                    SearchMode::Random
                };

                match self
                    .engine
                    .commit(first, second, mode, distance_km, PairingSource::Sweep)
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(
                            first = %first.participant_id,
                            second = %second.participant_id,
                            "Sweep commit failed: {}", e
                        );
                        false
                    }
                }
            }
            Ok(false) => {
                if let Err(e) = self
                    .engine
                    .evict(&second.participant_id, EvictionReason::NotSearching)
                    .await
                {
                    warn!(participant_id = %second.participant_id, "Eviction failed: {}", e);
                }
                false
            }
            Err(e) => {
                warn!(participant_id = %second.participant_id, "Status read failed: {}", e);
                false
            }
        };

        self.engine.release(second_lock).await;
        committed
    }
}
