//! Selection of the state backend from configuration
//!
//! Every instance that should pair with the others must be built from a
//! backend pointing at the same store.

use crate::collaborators::{
    InMemoryParticipantStore, Notifier, RedisParticipantStore, SessionStore, StatusStore,
};
use crate::config::StoreSettings;
use crate::error::Result;
use crate::matching::{MatchSettings, PairingEngine};
use crate::store::{self, InMemorySearchStore, LockManager, RedisKeys, RedisSearchStore, SearchPool};
use std::sync::Arc;
use tracing::info;

/// Pool, locks, statuses and sessions handed to the pairing engine
#[derive(Clone)]
pub struct Backend {
    pub pool: Arc<dyn SearchPool>,
    pub locks: Arc<dyn LockManager>,
    pub statuses: Arc<dyn StatusStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Backend {
    /// State private to this process
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemorySearchStore::new());
        let directory = Arc::new(InMemoryParticipantStore::new());
        Self {
            pool: store.clone(),
            locks: store,
            statuses: directory.clone(),
            sessions: directory,
        }
    }

    /// State shared through Redis under `key_prefix`
    pub async fn redis(url: &str, key_prefix: &str) -> Result<Self> {
        let connection = store::redis::connect(url).await?;
        let keys = RedisKeys::new(key_prefix);

        let store = Arc::new(RedisSearchStore::new(connection.clone(), keys.clone()));
        let directory = Arc::new(RedisParticipantStore::new(connection, keys));
        Ok(Self {
            pool: store.clone(),
            locks: store,
            statuses: directory.clone(),
            sessions: directory,
        })
    }

    pub async fn from_settings(settings: &StoreSettings) -> Result<Self> {
        if settings.is_in_memory() {
            info!("Using in-process store; pairing is limited to this instance");
            return Ok(Self::in_memory());
        }

        info!(prefix = %settings.key_prefix, "Using shared Redis store");
        Self::redis(&settings.url, &settings.key_prefix).await
    }

    /// An engine over this backend
    pub fn engine(&self, notifier: Arc<dyn Notifier>, settings: MatchSettings) -> PairingEngine {
        PairingEngine::new(
            self.pool.clone(),
            self.locks.clone(),
            self.statuses.clone(),
            self.sessions.clone(),
            notifier,
            settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryNotifier;
    use crate::types::{ParticipantStatus, Preference, SearchMode, SearchRequest};

    #[tokio::test]
    async fn test_memory_url_selects_in_process_backend() {
        let backend = Backend::from_settings(&StoreSettings::default())
            .await
            .unwrap();
        assert_eq!(backend.pool.size().await.unwrap(), 0);
        assert_eq!(
            backend.statuses.get_status("a").await.unwrap(),
            ParticipantStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_engines_over_one_backend_share_the_pool() {
        let backend = Backend::in_memory();
        let first = backend.engine(
            Arc::new(InMemoryNotifier::default()),
            MatchSettings::default(),
        );
        let second = backend.engine(
            Arc::new(InMemoryNotifier::default()),
            MatchSettings::default(),
        );

        let record = SearchRequest {
            participant_id: "a".to_string(),
            mode: SearchMode::Random,
            gender: None,
            preference: Preference::Any,
            coordinates: None,
        }
        .into_record(crate::utils::current_timestamp());
        first
            .pool()
            .enroll(record, MatchSettings::default().record_ttl)
            .await
            .unwrap();

        assert_eq!(second.members().await.unwrap(), vec!["a".to_string()]);
    }
}
