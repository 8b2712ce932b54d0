use huddle_core::{CaptureSource, MediaKind};
use huddle_engine::{DeviceError, EngineNotification};

use crate::integration::{connected_pair, init_tracing};
use crate::utils::{DeviceEvent, SignalRouter, TestParticipant, settle, test_config};

fn device_failures(notifications: &[EngineNotification]) -> Vec<DeviceError> {
    notifications
        .iter()
        .filter_map(|n| match n {
            EngineNotification::DeviceFailure(e) => Some(e.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_denied_camera_is_reported_and_left_off() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    alice.drain_notifications();
    router.clear();

    alice
        .devices
        .fail_next(DeviceError::PermissionDenied(CaptureSource::Camera));
    alice.handle.set_camera(true).await.unwrap();
    settle().await;

    assert_eq!(
        device_failures(&alice.drain_notifications()),
        vec![DeviceError::PermissionDenied(CaptureSource::Camera)]
    );
    assert!(!alice.snapshot().await.camera_on);
    assert_eq!(alice.connection_to(&bob).bound_track(MediaKind::Video), None);
    assert_eq!(router.offers_from(&alice.id), 0);

    // A later attempt works normally.
    alice.handle.set_camera(true).await.unwrap();
    settle().await;
    assert!(alice.snapshot().await.camera_on);
    assert_eq!(router.offers_from(&alice.id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_denied_screen_share_keeps_camera() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    alice.handle.set_camera(true).await.unwrap();
    settle().await;
    alice.drain_notifications();

    alice.devices.fail_next(DeviceError::Busy(CaptureSource::Screen));
    alice.handle.start_screen_share().await.unwrap();
    settle().await;

    assert_eq!(
        device_failures(&alice.drain_notifications()),
        vec![DeviceError::Busy(CaptureSource::Screen)]
    );
    let snapshot = alice.snapshot().await;
    assert!(!snapshot.screen_sharing);
    assert_eq!(
        alice.connection_to(&bob).bound_track(MediaKind::Video),
        Some("camera-1".to_owned())
    );
}

#[tokio::test(start_paused = true)]
async fn test_device_change_releases_before_reacquiring() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    alice.handle.set_microphone(true).await.unwrap();
    alice.handle.set_camera(true).await.unwrap();
    settle().await;

    alice
        .devices
        .fail_next(DeviceError::NotFound(CaptureSource::Camera));
    alice.drain_notifications();
    alice.handle.devices_changed().await.unwrap();
    settle().await;

    assert_eq!(
        alice.devices.events(),
        vec![
            DeviceEvent::Acquired("microphone-1".to_owned()),
            DeviceEvent::Acquired("camera-1".to_owned()),
            DeviceEvent::Released("microphone-1".to_owned()),
            DeviceEvent::Acquired("microphone-2".to_owned()),
            DeviceEvent::Released("camera-1".to_owned()),
        ]
    );
    assert_eq!(
        device_failures(&alice.drain_notifications()),
        vec![DeviceError::NotFound(CaptureSource::Camera)]
    );

    let connection = alice.connection_to(&bob);
    assert_eq!(
        connection.bound_track(MediaKind::Audio),
        Some("microphone-2".to_owned())
    );
    assert_eq!(connection.bound_track(MediaKind::Video), None);
    assert!(!alice.snapshot().await.camera_on);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_releases_every_capture() {
    init_tracing();

    let router = SignalRouter::new();
    let (mut alice, bob) = connected_pair(&router).await;
    alice.handle.set_microphone(true).await.unwrap();
    alice.handle.start_screen_share().await.unwrap();
    settle().await;
    let connection = alice.connection_to(&bob);
    alice.drain_notifications();

    alice.handle.leave().await.unwrap();
    settle().await;

    assert!(alice.devices.held().is_empty());
    assert!(connection.is_closed());
    assert!(alice.drain_notifications().iter().any(|n| matches!(
        n,
        EngineNotification::PeerRemoved { participant_id, .. } if *participant_id == bob.id
    )));
    assert!(alice.handle.snapshot().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_handle_leaves_the_room() {
    init_tracing();

    let (alice, _outgoing) = TestParticipant::spawn_detached("alice", test_config());
    alice.handle.set_microphone(true).await.unwrap();
    settle().await;
    assert!(!alice.devices.held().is_empty());

    let TestParticipant { handle, devices, .. } = alice;
    drop(handle);
    settle().await;

    assert!(devices.held().is_empty());
}
