//! End-to-end lifecycle tests against the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use zconf_manager::{
    AddressFamily, BackendError, DiscoveryEvent, EventAction, MemoryBackend, NetworkContext,
    ServiceRecord, Zconf, ZconfConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn agent(backend: &MemoryBackend) -> Zconf {
    Zconf::with_network(
        ZconfConfig::default(),
        Arc::new(backend.clone()),
        NetworkContext::from_parts(Vec::new(), Some("testhost".to_string())),
    )
    .unwrap()
}

fn txt(pairs: &[(&str, &str)]) -> HashMap<String, Option<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect()
}

async fn recv(events: &async_channel::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Asserts the channel stays quiet. Closure counts as quiet; only an
/// actual event fails.
async fn assert_no_event(events: &async_channel::Receiver<DiscoveryEvent>) {
    if let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        panic!("unexpected event: {event:?}");
    }
}

#[tokio::test]
async fn registration_count_tracks_register_and_unregister() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    for name in ["a", "b", "c"] {
        agent
            .register(
                "_http._tcp.",
                "local.",
                name,
                8080,
                HashMap::new(),
                AddressFamily::Any,
            )
            .await
            .unwrap();
    }
    let manager = agent.registration_manager().unwrap();
    assert_eq!(manager.registered_count(), 3);

    agent.unregister("_http._tcp.", "local.", "b");
    assert_eq!(manager.registered_count(), 2);

    // Unknown key: count unchanged.
    agent.unregister("_http._tcp.", "local.", "nope");
    assert_eq!(manager.registered_count(), 2);
}

#[tokio::test]
async fn stop_clears_state_even_when_cancellations_fail() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    for name in ["a", "b"] {
        agent
            .register(
                "_http._tcp.",
                "local.",
                name,
                8080,
                HashMap::new(),
                AddressFamily::Any,
            )
            .await
            .unwrap();
    }
    let manager = agent.registration_manager().unwrap();
    backend.fail_stop_advertise(true);

    agent.stop();
    assert_eq!(manager.registered_count(), 0);
    assert!(manager.active_services().is_empty());
    // Both cancellations were attempted despite failing.
    assert_eq!(backend.advertise_stops(), 2);
}

#[tokio::test]
async fn stop_with_no_registrations_is_safe() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    agent.stop();
    agent.stop();
    assert_eq!(backend.advertise_stops(), 0);
}

#[tokio::test]
async fn register_unregister_round_trip_hits_backend_once_each() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    agent
        .register(
            "_http._tcp.",
            "local.",
            "printer",
            631,
            txt(&[("model", "X1")]),
            AddressFamily::Ipv4,
        )
        .await
        .unwrap();
    agent.unregister("_http._tcp.", "local.", "printer");

    assert_eq!(backend.advertise_starts(), 1);
    assert_eq!(backend.advertise_stops(), 1);
    assert_eq!(agent.registration_manager().unwrap().registered_count(), 0);
}

#[tokio::test]
async fn duplicate_registration_silently_replaces() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    for _ in 0..2 {
        agent
            .register(
                "_http._tcp.",
                "local.",
                "printer",
                631,
                HashMap::new(),
                AddressFamily::Any,
            )
            .await
            .unwrap();
    }

    assert_eq!(backend.advertise_starts(), 2);
    assert_eq!(agent.registration_manager().unwrap().registered_count(), 1);
}

#[tokio::test]
async fn watch_found_resolved_lost_event_order() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    let events = agent
        .watch("_http._tcp.", "local.", AddressFamily::Ipv4)
        .await
        .unwrap();

    let mut service = ServiceRecord::new("_http._tcp.", "local.", "printer", 631);
    service.hostname = Some("printer.local".to_string());
    backend.announce_found(&service);

    let added = recv(&events).await;
    assert_eq!(added.action, EventAction::Added);
    assert_eq!(added.service.name, "printer");
    assert_eq!(added.service.port, 631);

    let resolved = recv(&events).await;
    assert_eq!(resolved.action, EventAction::Resolved);
    assert_eq!(resolved.service.name, "printer");
    assert_eq!(resolved.service.port, 631);

    backend.announce_lost(&service);
    let removed = recv(&events).await;
    assert_eq!(removed.action, EventAction::Removed);
    assert_eq!(removed.service.name, "printer");

    assert_no_event(&events).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watch_replays_already_published_services() {
    init_tracing();

    // The replayed sighting arrives the instant browsing starts; the
    // subscription must already be routable or it is lost. Repeat to give
    // the scheduler room to interleave.
    for _ in 0..50 {
        let backend = MemoryBackend::new();
        let agent = agent(&backend);

        agent
            .register(
                "_http._tcp.",
                "local.",
                "printer",
                631,
                HashMap::new(),
                AddressFamily::Any,
            )
            .await
            .unwrap();

        let events = agent
            .watch("_http._tcp.", "local.", AddressFamily::Any)
            .await
            .unwrap();

        let added = recv(&events).await;
        assert_eq!(added.action, EventAction::Added);
        assert_eq!(added.service.name, "printer");
        let resolved = recv(&events).await;
        assert_eq!(resolved.action, EventAction::Resolved);
    }
}

#[tokio::test]
async fn resolve_failure_degrades_to_single_added() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.set_resolve_failure("printer", "host unreachable");
    let agent = agent(&backend);

    let events = agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();

    backend.announce_found(&ServiceRecord::new("_http._tcp.", "local.", "printer", 631));

    let added = recv(&events).await;
    assert_eq!(added.action, EventAction::Added);
    assert_eq!(added.service.name, "printer");

    assert_no_event(&events).await;
}

#[tokio::test]
async fn sightings_of_other_types_never_reach_the_watcher() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    let events = agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();

    backend.announce_found(&ServiceRecord::new("_ipp._tcp.", "local.", "stray", 631));
    backend.announce_found(&ServiceRecord::new("_http._tcp.", "local.", "web", 80));
    backend.announce_lost(&ServiceRecord::new("_ipp._tcp.", "local.", "stray", 631));

    // Only the watched type's events arrive, in order.
    let added = recv(&events).await;
    assert_eq!(added.action, EventAction::Added);
    assert_eq!(added.service.name, "web");
    let resolved = recv(&events).await;
    assert_eq!(resolved.action, EventAction::Resolved);
    assert_eq!(resolved.service.name, "web");
    assert_no_event(&events).await;
}

#[tokio::test]
async fn registration_reaches_existing_watcher() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    let events = agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();

    agent
        .register(
            "_http._tcp.",
            "local.",
            "printer",
            631,
            txt(&[("model", "X1")]),
            AddressFamily::Any,
        )
        .await
        .unwrap();

    let added = recv(&events).await;
    assert_eq!(added.action, EventAction::Added);
    let resolved = recv(&events).await;
    assert_eq!(resolved.action, EventAction::Resolved);
    assert_eq!(
        resolved.service.txt.get("model").map(String::as_str),
        Some("X1")
    );

    agent.unregister("_http._tcp.", "local.", "printer");
    let removed = recv(&events).await;
    assert_eq!(removed.action, EventAction::Removed);
}

#[tokio::test]
async fn watch_start_failure_leaves_no_subscription() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.fail_next_browse(BackendError::Rejected("engine busy".into()));
    let agent = agent(&backend);

    let result = agent.watch("_http._tcp.", "local.", AddressFamily::Any).await;
    assert!(result.is_err());
    assert_eq!(agent.discovery_manager().unwrap().subscription_count(), 0);

    // The caller re-issues the watch; no retry happened behind its back.
    assert_eq!(backend.browse_starts(), 0);
    agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    assert_eq!(backend.browse_starts(), 1);
}

#[tokio::test]
async fn multicast_gate_follows_watch_close_lifecycle() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);
    let lock = agent.network().multicast_lock();

    assert!(!lock.is_active());

    agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    agent
        .watch("_ipp._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    assert!(lock.is_active());

    // Unwatch keeps the gate held.
    agent.unwatch("_http._tcp.", "local.");
    assert!(lock.is_active());

    agent.close();
    assert!(!lock.is_active());
    assert!(agent.discovery_manager().is_none());

    // A fresh watch re-acquires.
    agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    assert!(lock.is_active());
}

#[tokio::test]
async fn close_cancels_all_sessions_despite_failures() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    agent
        .watch("_ipp._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();

    let manager = agent.discovery_manager().unwrap();
    backend.fail_stop_browse(true);
    agent.close();

    assert_eq!(manager.subscription_count(), 0);
    assert_eq!(backend.browse_stops(), 2);
}

#[tokio::test]
async fn late_events_after_unwatch_are_dropped() {
    init_tracing();
    let backend = MemoryBackend::new();
    let agent = agent(&backend);

    let events = agent
        .watch("_http._tcp.", "local.", AddressFamily::Any)
        .await
        .unwrap();
    agent.unwatch("_http._tcp.", "local.");

    backend.announce_found(&ServiceRecord::new("_http._tcp.", "local.", "late", 80));
    assert_no_event(&events).await;
}
