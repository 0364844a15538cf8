//! Low-frequency pool cleanup
//!
//! Evicts members who are no longer searching and drops expired entries. The
//! janitor never takes match locks and never pairs anyone.

use crate::error::Result;
use crate::matching::PairingEngine;
use crate::metrics::collector::EvictionReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Summary of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub examined: usize,
    pub evicted: usize,
    pub expired_records: usize,
    pub expired_locks: usize,
}

pub struct JanitorWorker {
    engine: Arc<PairingEngine>,
    interval: Duration,
}

impl JanitorWorker {
    pub fn new(engine: Arc<PairingEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Janitor started ({}s interval)", self.interval.as_secs_f64());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Janitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.cleanup().await {
                        Ok(report) => debug!(
                            examined = report.examined,
                            evicted = report.evicted,
                            expired_records = report.expired_records,
                            expired_locks = report.expired_locks,
                            "Janitor pass completed"
                        ),
                        Err(e) => warn!("Janitor pass abandoned: {}", e),
                    }
                }
            }
        }

        info!("Janitor stopped");
    }

    /// Run one cleanup pass
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let members = self.engine.members().await?;
        report.examined = members.len();

        for id in &members {
            match self.engine.is_searching(id).await {
                Ok(true) => {}
                Ok(false) => match self.engine.evict(id, EvictionReason::NotSearching).await {
                    Ok(true) => report.evicted += 1,
                    Ok(false) => {}
                    Err(e) => warn!(participant_id = %id, "Janitor eviction failed: {}", e),
                },
                Err(e) => warn!(participant_id = %id, "Janitor status read failed: {}", e),
            }
        }

        report.expired_records = self
            .engine
            .bounded("pool_purge", self.engine.pool().purge_expired())
            .await?;
        report.expired_locks = self
            .engine
            .bounded("lock_purge", self.engine.locks().purge_expired_locks())
            .await?;

        if report.evicted > 0 || report.expired_records > 0 {
            info!(
                evicted = report.evicted,
                expired_records = report.expired_records,
                "Janitor removed stale pool entries"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryNotifier, InMemoryParticipantStore, StatusStore};
    use crate::matching::MatchSettings;
    use crate::store::{InMemorySearchStore, LockManager, SearchPool};
    use crate::types::{ParticipantStatus, Preference, SearchMode, SearchRecord};
    use chrono::Utc;

    fn setup() -> (
        Arc<InMemorySearchStore>,
        Arc<InMemoryParticipantStore>,
        JanitorWorker,
    ) {
        let store = Arc::new(InMemorySearchStore::new());
        let directory = Arc::new(InMemoryParticipantStore::new());
        let engine = Arc::new(PairingEngine::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            directory.clone(),
            Arc::new(InMemoryNotifier::default()),
            MatchSettings::default(),
        ));
        (
            store,
            directory,
            JanitorWorker::new(engine, Duration::from_secs(120)),
        )
    }

    fn record(id: &str) -> SearchRecord {
        SearchRecord {
            participant_id: id.to_string(),
            mode: SearchMode::Random,
            gender: None,
            preference: Preference::Any,
            latitude: None,
            longitude: None,
            inserted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_cleanup_evicts_only_non_searching() {
        let (store, directory, janitor) = setup();
        directory
            .set_status("active", ParticipantStatus::Searching)
            .await
            .unwrap();
        directory
            .set_status("chatting", ParticipantStatus::Chatting)
            .await
            .unwrap();
        store
            .enroll(record("active"), Duration::from_secs(300))
            .await
            .unwrap();
        store
            .enroll(record("chatting"), Duration::from_secs(300))
            .await
            .unwrap();
        store
            .enroll(record("unknown"), Duration::from_secs(300))
            .await
            .unwrap();

        let report = janitor.cleanup().await.unwrap();

        assert_eq!(report.examined, 3);
        assert_eq!(report.evicted, 2);
        assert_eq!(store.members().await.unwrap(), vec!["active"]);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_held_locks_alone() {
        let (store, directory, janitor) = setup();
        directory
            .set_status("busy", ParticipantStatus::Searching)
            .await
            .unwrap();
        store
            .enroll(record("busy"), Duration::from_secs(300))
            .await
            .unwrap();
        let lock = store
            .try_acquire("busy", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let report = janitor.cleanup().await.unwrap();

        assert_eq!(report.evicted, 0);
        assert_eq!(report.expired_locks, 0);
        assert!(store.is_locked("busy").await.unwrap());
        assert!(store.release(&lock).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_purges_expired_entries() {
        let (store, directory, janitor) = setup();
        directory
            .set_status("brief", ParticipantStatus::Searching)
            .await
            .unwrap();
        store
            .enroll(record("brief"), Duration::from_millis(20))
            .await
            .unwrap();
        store
            .try_acquire("brief", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = janitor.cleanup().await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(report.expired_records, 1);
        assert_eq!(report.expired_locks, 1);
    }
}
