//! In-process shared store with lazy TTL expiry

use super::{LockManager, MatchLock, SearchPool};
use crate::error::{MatchError, Result};
use crate::types::{ParticipantId, SearchRecord};
use crate::utils;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct PoolEntry {
    record: SearchRecord,
    /// Enrolment sequence number, defines pool order
    seq: u64,
    expires_at: Instant,
}

impl PoolEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<ParticipantId, PoolEntry>,
    next_seq: u64,
}

#[derive(Debug)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

/// Searching pool and lock table held in process memory.
///
/// A member whose record has expired is no longer reported by `members`, so
/// pool membership and record liveness never diverge here.
#[derive(Debug, Default)]
pub struct InMemorySearchStore {
    pool: RwLock<PoolState>,
    locks: Mutex<HashMap<ParticipantId, LockEntry>>,
}

impl InMemorySearchStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(what: &str) -> MatchError {
        MatchError::StoreUnavailable {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

#[async_trait]
impl SearchPool for InMemorySearchStore {
    async fn enroll(&self, record: SearchRecord, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut pool = self.pool.write().map_err(|_| Self::poisoned("pool write"))?;

        let seq = match pool.entries.get(&record.participant_id) {
            Some(existing) if existing.is_live(now) => existing.seq,
            _ => {
                let seq = pool.next_seq;
                pool.next_seq += 1;
                seq
            }
        };

        pool.entries.insert(
            record.participant_id.clone(),
            PoolEntry {
                record,
                seq,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn evict(&self, participant_id: &str) -> Result<bool> {
        let mut pool = self.pool.write().map_err(|_| Self::poisoned("pool write"))?;
        Ok(pool.entries.remove(participant_id).is_some())
    }

    async fn members(&self) -> Result<Vec<ParticipantId>> {
        let now = Instant::now();
        let pool = self.pool.read().map_err(|_| Self::poisoned("pool read"))?;

        let mut live: Vec<(&ParticipantId, u64)> = pool
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(id, entry)| (id, entry.seq))
            .collect();
        live.sort_by_key(|(_, seq)| *seq);

        Ok(live.into_iter().map(|(id, _)| id.clone()).collect())
    }

    async fn record(&self, participant_id: &str) -> Result<Option<SearchRecord>> {
        let now = Instant::now();
        let pool = self.pool.read().map_err(|_| Self::poisoned("pool read"))?;

        Ok(pool
            .entries
            .get(participant_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.record.clone()))
    }

    async fn size(&self) -> Result<usize> {
        let now = Instant::now();
        let pool = self.pool.read().map_err(|_| Self::poisoned("pool read"))?;
        Ok(pool.entries.values().filter(|e| e.is_live(now)).count())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut pool = self.pool.write().map_err(|_| Self::poisoned("pool write"))?;

        let before = pool.entries.len();
        pool.entries.retain(|_, entry| entry.is_live(now));
        let purged = before - pool.entries.len();

        if purged > 0 {
            debug!(purged, "Purged expired search records");
        }
        Ok(purged)
    }
}

#[async_trait]
impl LockManager for InMemorySearchStore {
    async fn try_acquire(&self, participant_id: &str, ttl: Duration) -> Result<Option<MatchLock>> {
        let now = Instant::now();
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned("lock table"))?;

        if let Some(existing) = locks.get(participant_id) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }

        let token = utils::generate_lock_token();
        locks.insert(
            participant_id.to_string(),
            LockEntry {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );

        Ok(Some(MatchLock {
            participant_id: participant_id.to_string(),
            token,
        }))
    }

    async fn release(&self, lock: &MatchLock) -> Result<bool> {
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned("lock table"))?;

        match locks.get(&lock.participant_id) {
            Some(existing) if existing.token == lock.token => {
                locks.remove(&lock.participant_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, participant_id: &str) -> Result<bool> {
        let now = Instant::now();
        let locks = self.locks.lock().map_err(|_| Self::poisoned("lock table"))?;
        Ok(locks
            .get(participant_id)
            .is_some_and(|entry| entry.expires_at > now))
    }

    async fn purge_expired_locks(&self) -> Result<usize> {
        let now = Instant::now();
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned("lock table"))?;

        let before = locks.len();
        locks.retain(|_, entry| entry.expires_at > now);
        Ok(before - locks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Preference, SearchMode};
    use chrono::Utc;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

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
    async fn test_enroll_and_members_keep_first_enrolment_order() {
        let store = InMemorySearchStore::new();
        store.enroll(record("a"), TTL).await.unwrap();
        store.enroll(record("b"), TTL).await.unwrap();
        store.enroll(record("c"), TTL).await.unwrap();

        // Refreshing "a" must not move it to the back
        let mut refreshed = record("a");
        refreshed.mode = SearchMode::Nearby;
        store.enroll(refreshed, TTL).await.unwrap();

        assert_eq!(store.members().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            store.record("a").await.unwrap().unwrap().mode,
            SearchMode::Nearby
        );
        assert_eq!(store.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let store = InMemorySearchStore::new();
        store.enroll(record("a"), TTL).await.unwrap();

        assert!(store.evict("a").await.unwrap());
        assert!(!store.evict("a").await.unwrap());
        assert!(!store.evict("never-enrolled").await.unwrap());
        assert!(store.members().await.unwrap().is_empty());
        assert!(store.record("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible_and_purged() {
        let store = InMemorySearchStore::new();
        store
            .enroll(record("short"), Duration::from_millis(20))
            .await
            .unwrap();
        store.enroll(record("long"), TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.record("short").await.unwrap().is_none());
        assert_eq!(store.members().await.unwrap(), vec!["long"]);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let store = InMemorySearchStore::new();

        let lock = store.try_acquire("a", TTL).await.unwrap().unwrap();
        assert!(store.is_locked("a").await.unwrap());
        assert!(store.try_acquire("a", TTL).await.unwrap().is_none());

        assert!(store.release(&lock).await.unwrap());
        assert!(!store.is_locked("a").await.unwrap());
        assert!(store.try_acquire("a", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_lock() {
        let store = InMemorySearchStore::new();

        let stale = store
            .try_acquire("a", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Expired lock can be taken over
        let fresh = store.try_acquire("a", TTL).await.unwrap().unwrap();
        assert_ne!(stale.token, fresh.token);

        assert!(!store.release(&stale).await.unwrap());
        assert!(store.is_locked("a").await.unwrap());
        assert!(store.release(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_locks() {
        let store = InMemorySearchStore::new();
        store
            .try_acquire("a", Duration::from_millis(10))
            .await
            .unwrap();
        store.try_acquire("b", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired_locks().await.unwrap(), 1);
        assert!(store.is_locked("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let store = Arc::new(InMemorySearchStore::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_acquire("contended", TTL).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
