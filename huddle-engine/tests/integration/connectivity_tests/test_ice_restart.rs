use huddle_core::ConnectionState;
use huddle_engine::{EngineNotification, TeardownReason};
use std::time::Duration;

use crate::integration::{connected_pair, init_tracing};
use crate::utils::{SignalRouter, assert_converged, join_room, settle};

fn removed_for_connectivity(notifications: &[EngineNotification]) -> bool {
    notifications.iter().any(|n| {
        matches!(
            n,
            EngineNotification::PeerRemoved {
                reason: TeardownReason::ConnectivityFailure,
                ..
            }
        )
    })
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_with_ice_restart() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;
    let connection = alice.connection_to(&bob);
    let offers_before = connection.offers_created();
    router.clear();

    connection.fail_connectivity(false);
    settle().await;

    // One restart offer on the same connection brings it back.
    assert_eq!(connection.offers_created(), offers_before + 1);
    assert_eq!(router.offers_from(&alice.id), 1);
    assert_eq!(connection.connection_state(), ConnectionState::Connected);
    assert_eq!(alice.factory.connections_created(&bob.id), 1);
    let peer = alice.peer(&bob).await.unwrap();
    assert_eq!(peer.epoch, 1);
    assert_converged(&alice, &bob).await;

    // Both sides gathered a fresh generation of candidates.
    assert!(router.candidates_from(&alice.id) > 0);
    assert!(router.candidates_from(&bob.id) > 0);

    // The restart budget is per failure: a later failure restarts again.
    connection.fail_connectivity(false);
    settle().await;
    assert_eq!(connection.offers_created(), offers_before + 2);
    assert_converged(&alice, &bob).await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_that_never_connects_tears_down() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    let connection = alice.connection_to(&bob);
    alice.drain_notifications();

    connection.fail_connectivity(true);
    settle().await;
    // Restart offered, still waiting for connectivity.
    let peer = alice.peer(&bob).await.expect("peer dropped too early");
    assert_ne!(peer.connection, ConnectionState::Connected);

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(alice.peer(&bob).await.is_none());
    assert!(connection.is_closed());
    assert!(removed_for_connectivity(&alice.drain_notifications()));

    // The next presence update brings the peer back on a new connection.
    join_room(&[&alice, &bob]).await;
    assert_eq!(alice.factory.connections_created(&bob.id), 2);
    let peer = alice.peer(&bob).await.unwrap();
    assert_eq!(peer.epoch, 2);
    assert_converged(&alice, &bob).await;
}

#[tokio::test(start_paused = true)]
async fn test_second_failure_after_restart_gives_up() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    let connection = alice.connection_to(&bob);
    alice.drain_notifications();

    connection.fail_connectivity(true);
    settle().await;
    assert!(alice.peer(&bob).await.is_some());

    // Fails again before the restart deadline.
    connection.fail_connectivity(true);
    settle().await;

    assert!(alice.peer(&bob).await.is_none());
    assert!(connection.is_closed());
    assert!(removed_for_connectivity(&alice.drain_notifications()));
}
