//! Shared setup for integration tests

#![allow(dead_code)]

use rendezvous::bus::InMemorySearchBus;
use rendezvous::collaborators::{InMemoryNotifier, InMemoryParticipantStore, StatusStore};
use rendezvous::matching::{MatchSettings, PairingEngine};
use rendezvous::metrics::MetricsCollector;
use rendezvous::service::ProductionCommandHandler;
use rendezvous::store::InMemorySearchStore;
use rendezvous::types::{
    Coordinates, Gender, ParticipantStatus, Preference, SearchMode, SearchRecord, SearchRequest,
};
use rendezvous::workers::{Dispatcher, MatchWorker, ReconciliationWorker};
use std::sync::Arc;
use std::time::Duration;

/// Every in-memory component wired to one engine
pub struct TestHarness {
    pub store: Arc<InMemorySearchStore>,
    pub directory: Arc<InMemoryParticipantStore>,
    pub notifier: Arc<InMemoryNotifier>,
    pub bus: Arc<InMemorySearchBus>,
    pub engine: Arc<PairingEngine>,
    pub dispatcher: Dispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(MatchSettings::default())
    }

    pub fn with_settings(settings: MatchSettings) -> Self {
        let store = Arc::new(InMemorySearchStore::new());
        let directory = Arc::new(InMemoryParticipantStore::new());
        let notifier = Arc::new(InMemoryNotifier::default());
        let bus = Arc::new(InMemorySearchBus::default());
        let engine = Arc::new(PairingEngine::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            directory.clone(),
            notifier.clone(),
            settings,
        ));
        let dispatcher = Dispatcher::new(engine.clone(), bus.clone());

        Self {
            store,
            directory,
            notifier,
            bus,
            engine,
            dispatcher,
        }
    }

    pub fn worker(&self, mode: SearchMode) -> MatchWorker {
        MatchWorker::new(mode, self.engine.clone(), self.bus.clone())
    }

    pub fn reconciler(&self) -> ReconciliationWorker {
        ReconciliationWorker::new(self.engine.clone(), Duration::from_secs(5))
    }

    /// A command handler over this harness's dispatcher and directory
    pub fn handler(&self) -> ProductionCommandHandler {
        ProductionCommandHandler::new(
            Arc::new(Dispatcher::new(self.engine.clone(), self.bus.clone())),
            self.directory.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    /// Mark the participant as searching and submit the request
    pub async fn search(&self, request: SearchRequest) -> SearchRecord {
        self.directory
            .set_status(&request.participant_id, ParticipantStatus::Searching)
            .await
            .unwrap();
        self.dispatcher.submit(request).await.unwrap()
    }

    pub async fn status(&self, participant_id: &str) -> ParticipantStatus {
        self.directory.get_status(participant_id).await.unwrap()
    }

    pub fn session_count(&self) -> usize {
        self.directory.sessions().unwrap().len()
    }
}

pub fn request(id: &str, mode: SearchMode, gender: Gender, preference: Preference) -> SearchRequest {
    SearchRequest {
        participant_id: id.to_string(),
        mode,
        gender: Some(gender),
        preference,
        coordinates: None,
    }
}

pub fn located(
    id: &str,
    mode: SearchMode,
    gender: Gender,
    latitude: f64,
    longitude: f64,
) -> SearchRequest {
    SearchRequest {
        coordinates: Coordinates::new(latitude, longitude),
        ..request(id, mode, gender, Preference::Any)
    }
}
