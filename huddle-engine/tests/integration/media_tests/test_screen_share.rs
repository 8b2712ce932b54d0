use huddle_core::MediaKind;

use crate::integration::{connected_pair, init_tracing};
use crate::utils::{DeviceEvent, SignalRouter, assert_converged, settle};

#[tokio::test(start_paused = true)]
async fn test_screen_share_swaps_video_and_restores_camera() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;
    alice.handle.set_camera(true).await.unwrap();
    settle().await;

    alice.handle.start_screen_share().await.unwrap();
    settle().await;

    let snapshot = alice.snapshot().await;
    assert!(snapshot.screen_sharing);
    assert_eq!(snapshot.outgoing_video.as_deref(), Some("screen-1"));
    let connection = alice.connection_to(&bob);
    assert_eq!(connection.bound_track(MediaKind::Video), Some("screen-1".to_owned()));
    assert_eq!(connection.slot_count(), 2);
    // The display was bound before the camera was let go.
    assert_eq!(
        alice.devices.events(),
        vec![
            DeviceEvent::Acquired("camera-1".to_owned()),
            DeviceEvent::Acquired("screen-1".to_owned()),
            DeviceEvent::Released("camera-1".to_owned()),
        ]
    );

    alice.handle.stop_screen_share().await.unwrap();
    settle().await;

    let snapshot = alice.snapshot().await;
    assert!(!snapshot.screen_sharing);
    assert!(snapshot.camera_on);
    assert_eq!(snapshot.outgoing_video.as_deref(), Some("camera-2"));
    assert_eq!(connection.bound_track(MediaKind::Video), Some("camera-2".to_owned()));
    assert!(alice.devices.released("screen-1"));
    assert_eq!(alice.devices.held(), vec!["camera-2".to_owned()]);

    assert_eq!(connection.slot_count(), 2);
    assert_converged(&alice, &bob).await;
}

#[tokio::test(start_paused = true)]
async fn test_platform_ending_share_without_camera_leaves_video_empty() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;

    alice.handle.start_screen_share().await.unwrap();
    settle().await;
    assert_eq!(
        bob.handle.media().video(&alice.id).map(|t| t.id().to_owned()),
        Some("screen-1".to_owned())
    );

    // Toggling the camera mid-share only takes effect afterwards.
    alice.handle.set_camera(true).await.unwrap();
    alice.handle.set_camera(false).await.unwrap();
    alice.handle.screen_share_ended().await.unwrap();
    settle().await;

    let snapshot = alice.snapshot().await;
    assert!(!snapshot.screen_sharing);
    assert!(!snapshot.camera_on);
    assert_eq!(alice.connection_to(&bob).bound_track(MediaKind::Video), None);
    assert!(alice.devices.held().is_empty());
    assert_converged(&alice, &bob).await;
}
