use huddle_core::MediaKind;

use crate::integration::{connected_pair, init_tracing};
use crate::utils::{SignalRouter, assert_converged, settle};

#[tokio::test(start_paused = true)]
async fn test_camera_off_keeps_transceivers_and_renegotiates_once() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;

    alice.handle.set_camera(true).await.unwrap();
    settle().await;
    assert_converged(&alice, &bob).await;
    assert_eq!(
        alice.connection_to(&bob).bound_track(MediaKind::Video),
        Some("camera-1".to_owned())
    );

    router.clear();
    alice.handle.set_camera(false).await.unwrap();
    settle().await;

    let connection = alice.connection_to(&bob);
    assert_eq!(connection.bound_track(MediaKind::Video), None);
    assert_eq!(connection.slot_count(), 2);
    assert_eq!(bob.connection_to(&alice).slot_count(), 2);
    assert_eq!(router.offers_from(&alice.id), 1);
    assert_eq!(router.offers_from(&bob.id), 0);
    assert_converged(&alice, &bob).await;

    // The capture is gone, not just unbound.
    assert!(alice.devices.released("camera-1"));
    assert!(alice.devices.held().is_empty());
    let snapshot = alice.snapshot().await;
    assert!(!snapshot.camera_on);
    assert_eq!(snapshot.outgoing_video, None);
}

#[tokio::test(start_paused = true)]
async fn test_mute_keeps_microphone_captured() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;

    alice.handle.set_microphone(true).await.unwrap();
    settle().await;
    assert_eq!(
        alice.connection_to(&bob).bound_track(MediaKind::Audio),
        Some("microphone-1".to_owned())
    );
    let audio = bob.handle.media().audio(&alice.id).expect("no audio from alice");
    assert_eq!(audio.id(), "microphone-1");

    alice.handle.set_microphone(false).await.unwrap();
    settle().await;
    assert_eq!(alice.connection_to(&bob).bound_track(MediaKind::Audio), None);
    assert_eq!(alice.devices.held(), vec!["microphone-1".to_owned()]);

    // Unmuting reuses the same capture.
    alice.handle.set_microphone(true).await.unwrap();
    settle().await;
    assert_eq!(
        alice.connection_to(&bob).bound_track(MediaKind::Audio),
        Some("microphone-1".to_owned())
    );
    assert_converged(&alice, &bob).await;
}

#[tokio::test(start_paused = true)]
async fn test_tracks_enabled_before_joining_are_sent() {
    init_tracing();

    let router = SignalRouter::new();
    let alice = crate::utils::TestParticipant::spawn(&router, "alice");
    let bob = crate::utils::TestParticipant::spawn(&router, "bob");
    alice.handle.set_camera(true).await.unwrap();
    alice.handle.set_microphone(true).await.unwrap();

    crate::utils::join_room(&[&alice, &bob]).await;
    assert_converged(&alice, &bob).await;

    let stream = bob.handle.media().stream(&alice.id).expect("nothing from alice");
    assert_eq!(stream.audio().map(|t| t.id().to_owned()), Some("microphone-1".to_owned()));
    assert_eq!(stream.video().map(|t| t.id().to_owned()), Some("camera-1".to_owned()));
}
