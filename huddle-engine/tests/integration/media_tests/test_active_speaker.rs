use huddle_core::ParticipantId;
use huddle_engine::AudioAnalyser;

use crate::integration::{connected_pair, init_tracing};
use crate::utils::{SignalRouter, TestParticipant, join_room, settle, test_config};

fn active(participant: &TestParticipant) -> Option<ParticipantId> {
    participant.handle.active_speaker().borrow().clone()
}

/// Feed a burst of loud samples into whatever decodes alice's audio at bob.
fn alice_speaks(bob: &TestParticipant, alice: &TestParticipant) {
    let audio = bob
        .handle
        .media()
        .audio(&alice.id)
        .expect("bob receives no audio from alice");
    let tap = audio.tap().expect("audio tracks carry a tap");
    tap.push(&[0.5; 1024]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_speaker_becomes_active() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;
    alice.handle.set_microphone(true).await.unwrap();
    settle().await;
    assert_eq!(active(&bob), None);

    alice_speaks(&bob, &alice);
    settle().await;
    assert_eq!(active(&bob), Some(alice.id.clone()));

    // A pin wins over the audio, and unpinning hands focus back.
    bob.handle.pin(Some(bob.id.clone())).await.unwrap();
    settle().await;
    assert_eq!(active(&bob), Some(bob.id.clone()));

    bob.handle.pin(None).await.unwrap();
    settle().await;
    assert_eq!(active(&bob), Some(alice.id.clone()));
}

#[tokio::test(start_paused = true)]
async fn test_departed_speaker_is_cleared() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;
    alice.handle.set_microphone(true).await.unwrap();
    settle().await;
    alice_speaks(&bob, &alice);
    settle().await;
    assert_eq!(active(&bob), Some(alice.id.clone()));

    bob.handle.presence(vec![bob.id.clone()]).await.unwrap();
    settle().await;

    assert_eq!(active(&bob), None);
    assert!(bob.handle.media().stream(&alice.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_quiet_room_has_no_speaker() {
    init_tracing();

    let router = SignalRouter::new();
    let (alice, bob) = connected_pair(&router).await;
    alice.handle.set_microphone(true).await.unwrap();
    bob.handle.set_microphone(true).await.unwrap();
    settle().await;

    // Background hiss stays under the noise floor.
    let audio = bob.handle.media().audio(&alice.id).unwrap();
    audio.tap().unwrap().push(&[0.01; 1024]);
    settle().await;

    assert_eq!(active(&alice), None);
    assert_eq!(active(&bob), None);
}

#[tokio::test(start_paused = true)]
async fn test_received_audio_is_measured_over_configured_window() {
    init_tracing();

    let mut config = test_config();
    config.speaker.window = 256;
    let router = SignalRouter::new();
    let alice = TestParticipant::spawn_with_config(&router, "alice", config.clone());
    let bob = TestParticipant::spawn_with_config(&router, "bob", config);
    join_room(&[&alice, &bob]).await;

    alice.handle.set_microphone(true).await.unwrap();
    settle().await;

    let tap = bob.handle.media().audio(&alice.id).unwrap().tap().unwrap();
    assert_eq!(tap.window(), 256);

    alice_speaks(&bob, &alice);
    assert_eq!(tap.time_domain_samples().len(), 256);
    settle().await;
    assert_eq!(active(&bob), Some(alice.id.clone()));
}
