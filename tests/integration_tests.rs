//! End-to-end pairing flows over the in-memory components

mod fixtures;

use fixtures::{located, request, TestHarness};
use rendezvous::amqp::handlers::process_command;
use rendezvous::bus::InMemorySearchBus;
use rendezvous::collaborators::{InMemoryNotifier, SessionStore, StatusStore};
use rendezvous::matching::MatchSettings;
use rendezvous::metrics::MetricsCollector;
use rendezvous::service::{spawn_workers, Backend, ProductionCommandHandler};
use rendezvous::store::SearchPool;
use rendezvous::types::{Gender, ParticipantStatus, Preference, SearchMode, SearchRequest};
use rendezvous::workers::{AttemptOutcome, Dispatcher};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_nearby_pair_is_committed_once_and_both_notified() {
    let h = TestHarness::new();
    let worker = h.worker(SearchMode::Nearby);

    let a = h
        .search(SearchRequest {
            preference: Preference::Female,
            ..located("a", SearchMode::Nearby, Gender::Male, 1.0, 1.0)
        })
        .await;
    assert_eq!(
        worker.attempt(a).await.unwrap(),
        AttemptOutcome::FellBack,
        "alone in the pool, a nearby search falls back to random"
    );

    let b = h
        .search(SearchRequest {
            preference: Preference::Male,
            ..located("b", SearchMode::Nearby, Gender::Female, 1.05, 1.0)
        })
        .await;
    let outcome = worker.attempt(b).await.unwrap();

    let AttemptOutcome::Paired {
        partner_id,
        distance_km,
        session_id,
    } = outcome
    else {
        panic!("expected a pairing, got {:?}", outcome);
    };
    assert_eq!(partner_id, "a");
    let distance = distance_km.unwrap();
    assert!((distance - 5.56).abs() < 0.05, "distance was {}", distance);

    assert_eq!(h.session_count(), 1);
    assert_eq!(h.status("a").await, ParticipantStatus::Chatting);
    assert_eq!(h.status("b").await, ParticipantStatus::Chatting);
    assert_eq!(h.store.size().await.unwrap(), 0);

    for (me, partner) in [("a", "b"), ("b", "a")] {
        let delivered = h.notifier.delivered_to(me);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].partner_id, partner);
        assert_eq!(delivered[0].session_id, session_id);
        assert_eq!(delivered[0].mode, SearchMode::Nearby);
    }
}

#[tokio::test]
async fn test_withdrawn_participant_is_never_paired() {
    let h = TestHarness::new();
    let worker = h.worker(SearchMode::Random);

    let a = h
        .search(request("a", SearchMode::Random, Gender::Male, Preference::Any))
        .await;
    assert!(h.dispatcher.withdraw("a").await.unwrap());
    h.directory
        .set_status("a", ParticipantStatus::Idle)
        .await
        .unwrap();

    // The broadcast for "a" arrives after the withdrawal
    assert_eq!(
        worker.attempt(a).await.unwrap(),
        AttemptOutcome::NotSearching
    );

    let b = h
        .search(request("b", SearchMode::Random, Gender::Female, Preference::Any))
        .await;
    assert_eq!(worker.attempt(b).await.unwrap(), AttemptOutcome::NoPartner);

    assert_eq!(h.session_count(), 0);
    assert!(h.notifier.delivered().is_empty());
    assert_eq!(h.store.members().await.unwrap(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_withdraw_is_idempotent() {
    let h = TestHarness::new();
    h.search(request("a", SearchMode::Random, Gender::Male, Preference::Any))
        .await;

    assert!(h.dispatcher.withdraw("a").await.unwrap());
    assert!(!h.dispatcher.withdraw("a").await.unwrap());
    assert!(!h.dispatcher.withdraw("nobody").await.unwrap());
    assert_eq!(h.store.size().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_never_double_pair() {
    let h = TestHarness::new();
    let mut records = Vec::new();
    for i in 0..10 {
        let id = format!("p{}", i);
        records.push(
            h.search(request(&id, SearchMode::Random, Gender::Other, Preference::Any))
                .await,
        );
    }

    let mut tasks = Vec::new();
    for round in 0..4 {
        let worker = Arc::new(h.worker(SearchMode::Random));
        let mut order = records.clone();
        order.rotate_left(round * 3);
        tasks.push(tokio::spawn(async move {
            for record in order {
                let _ = worker.attempt(record).await;
            }
        }));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let sessions = h.directory.sessions().unwrap();
    let mut seen = HashSet::new();
    for session in &sessions {
        assert!(seen.insert(session.participants.0.clone()));
        assert!(seen.insert(session.participants.1.clone()));
    }
    for id in &seen {
        assert_eq!(h.status(id).await, ParticipantStatus::Chatting);
        assert_eq!(h.store.record(id).await.unwrap(), None);
    }

    // Whatever contention left unpaired is picked up by the sweep
    h.reconciler().sweep().await.unwrap();
    assert_eq!(h.session_count(), 5);
    assert_eq!(h.notifier.delivered().len(), 10);
    assert_eq!(h.store.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lost_broadcasts_are_repaired_by_one_sweep() {
    let h = TestHarness::new();

    // Nobody is subscribed, so both broadcasts go unobserved
    h.search(request("a", SearchMode::Random, Gender::Male, Preference::Female))
        .await;
    h.search(request("b", SearchMode::Nearby, Gender::Female, Preference::Any))
        .await;
    assert_eq!(h.session_count(), 0);

    let report = h.reconciler().sweep().await.unwrap();
    assert_eq!(report.paired, 1);

    let sessions = h.directory.sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].participants, ("a".to_string(), "b".to_string()));
    assert_eq!(h.notifier.delivered_to("b")[0].mode, SearchMode::Random);
}

#[tokio::test]
async fn test_incompatible_preferences_stay_in_pool() {
    let h = TestHarness::new();
    let worker = h.worker(SearchMode::Random);

    h.search(request("a", SearchMode::Random, Gender::Male, Preference::Male))
        .await;
    let b = h
        .search(request("b", SearchMode::Random, Gender::Female, Preference::Any))
        .await;

    assert_eq!(worker.attempt(b).await.unwrap(), AttemptOutcome::NoPartner);
    assert_eq!(h.reconciler().sweep().await.unwrap().paired, 0);
    assert_eq!(h.store.size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_commands_flow_through_running_workers() {
    let h = TestHarness::new();
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let engine = Arc::new(
        rendezvous::matching::PairingEngine::new(
            h.store.clone(),
            h.store.clone(),
            h.directory.clone(),
            h.directory.clone(),
            h.notifier.clone(),
            Default::default(),
        )
        .with_metrics(metrics.clone()),
    );
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), h.bus.clone()));
    let handler = ProductionCommandHandler::new(dispatcher, h.directory.clone(), metrics.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = spawn_workers(
        engine,
        h.bus.clone(),
        Duration::from_secs(60),
        Duration::from_secs(60),
        &shutdown_tx,
    )
    .await
    .unwrap();

    let submit_a = br#"{"type":"Submit","participant_id":"a","mode":"random","gender":"male","preference":"female"}"#;
    let submit_b = br#"{"type":"Submit","participant_id":"b","mode":"random","gender":"female"}"#;
    process_command(&handler, submit_a).await.unwrap();
    process_command(&handler, submit_b).await.unwrap();

    let paired = tokio::time::timeout(Duration::from_secs(2), async {
        while h.session_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(paired.is_ok(), "workers never paired the participants");

    assert_eq!(h.session_count(), 1);
    assert_eq!(h.status("a").await, ParticipantStatus::Chatting);
    assert_eq!(h.status("b").await, ParticipantStatus::Chatting);

    let stats = metrics.stats();
    assert_eq!(stats.searches_submitted, 2);
    assert_eq!(stats.pairings_by_worker + stats.pairings_by_sweep, 1);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_participant_is_paired_again_after_ending_a_session() {
    let h = TestHarness::new();
    let handler = h.handler();
    let submit_a = br#"{"type":"Submit","participant_id":"a","mode":"random"}"#;
    let submit_b = br#"{"type":"Submit","participant_id":"b","mode":"random"}"#;
    let submit_c = br#"{"type":"Submit","participant_id":"c","mode":"random"}"#;

    process_command(&handler, submit_a).await.unwrap();
    process_command(&handler, submit_b).await.unwrap();
    assert_eq!(h.reconciler().sweep().await.unwrap().paired, 1);
    let first = h.directory.sessions().unwrap()[0].id;

    process_command(&handler, br#"{"type":"End","participant_id":"a"}"#)
        .await
        .unwrap();

    assert_eq!(h.status("a").await, ParticipantStatus::Idle);
    assert_eq!(h.status("b").await, ParticipantStatus::Idle);
    assert_eq!(h.directory.active_session_count().unwrap(), 0);
    let left = h.notifier.departures_to("b");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].session_id, first);

    // Both searching again: "a" is free to meet someone new
    process_command(&handler, submit_a).await.unwrap();
    process_command(&handler, submit_c).await.unwrap();
    assert_eq!(h.reconciler().sweep().await.unwrap().paired, 1);

    assert_eq!(h.status("a").await, ParticipantStatus::Chatting);
    assert_eq!(h.directory.partner_of("a").await.unwrap(), Some("c".to_string()));
    assert_eq!(h.directory.active_session_count().unwrap(), 1);

    // Next from "c" leaves "a" and puts "c" back in the pool, where "b" is waiting
    process_command(&handler, submit_b).await.unwrap();
    process_command(
        &handler,
        br#"{"type":"Next","participant_id":"c","mode":"random"}"#,
    )
    .await
    .unwrap();
    assert_eq!(h.notifier.departures_to("a").len(), 1);
    assert_eq!(h.status("a").await, ParticipantStatus::Idle);

    assert_eq!(h.reconciler().sweep().await.unwrap().paired, 1);
    assert_eq!(h.directory.partner_of("c").await.unwrap(), Some("b".to_string()));
    assert_eq!(h.session_count(), 3);
}

#[tokio::test]
async fn test_instances_sharing_a_backend_pair_across_instances() {
    let backend = Backend::in_memory();

    // Two service instances, each with its own bus and notifier
    let instances: Vec<_> = (0..2)
        .map(|_| {
            let notifier = Arc::new(InMemoryNotifier::default());
            let engine = Arc::new(backend.engine(notifier.clone(), MatchSettings::default()));
            let bus = Arc::new(InMemorySearchBus::default());
            let dispatcher = Dispatcher::new(engine.clone(), bus);
            (engine, dispatcher, notifier)
        })
        .collect();

    for (index, id) in ["a", "b"].into_iter().enumerate() {
        backend
            .statuses
            .set_status(id, ParticipantStatus::Searching)
            .await
            .unwrap();
        instances[index]
            .1
            .submit(request(id, SearchMode::Random, Gender::Other, Preference::Any))
            .await
            .unwrap();
    }

    assert_eq!(instances[0].0.members().await.unwrap(), vec!["a", "b"]);

    let reconciler = rendezvous::workers::ReconciliationWorker::new(
        instances[0].0.clone(),
        Duration::from_secs(5),
    );
    assert_eq!(reconciler.sweep().await.unwrap().paired, 1);

    assert_eq!(
        backend.sessions.partner_of("b").await.unwrap(),
        Some("a".to_string())
    );
    assert_eq!(backend.pool.size().await.unwrap(), 0);
    assert_eq!(
        backend.statuses.get_status("a").await.unwrap(),
        ParticipantStatus::Chatting
    );
    assert_eq!(instances[0].2.delivered().len(), 2);
}
