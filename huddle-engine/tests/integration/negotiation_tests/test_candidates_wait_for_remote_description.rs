use huddle_core::{IceCandidate, SignalMessage};

use crate::integration::init_tracing;
use crate::utils::{ManualPeer, TestParticipant, answers, drain_signals, settle, test_config};

#[tokio::test(start_paused = true)]
async fn test_candidates_wait_for_remote_description() {
    init_tracing();

    let (alice, mut outgoing) = TestParticipant::spawn_detached("alice", test_config());
    let mut bob = ManualPeer::new("bob", &alice.id).await;

    // bob's candidates overtake his offer.
    let offer = bob.create_offer().await;
    let candidates = bob.take_candidates();
    assert!(!candidates.is_empty());
    bob.send_candidates(&alice.handle, candidates.clone()).await;

    // alice had never heard of bob, so the signal itself created the peer.
    let peer = alice.peer_by_id(&bob.id).await.expect("no peer created for bob");
    assert_eq!(peer.buffered_candidates, candidates.len());
    let connection = alice.factory.connection(&bob.id).unwrap();
    assert!(connection.applied_candidates().is_empty());

    alice.handle.signal(bob.offer_msg(&offer.sdp)).await.unwrap();
    settle().await;

    assert_eq!(answers(&drain_signals(&mut outgoing)).len(), 1);
    assert_eq!(connection.applied_candidates(), candidates);
    let peer = alice.peer_by_id(&bob.id).await.unwrap();
    assert_eq!(peer.buffered_candidates, 0);

    // Once the description is in, candidates go straight through.
    let late = IceCandidate {
        candidate: "candidate:99 1 udp 2130706431 127.0.0.1 50999 typ host".to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
    };
    alice
        .handle
        .signal(SignalMessage::IceCandidate {
            from: bob.id.clone(),
            target: alice.id.clone(),
            candidate: late.clone(),
        })
        .await
        .unwrap();
    settle().await;

    let applied = connection.applied_candidates();
    assert_eq!(applied.len(), candidates.len() + 1);
    assert_eq!(applied.last(), Some(&late));
}

#[tokio::test(start_paused = true)]
async fn test_signals_for_someone_else_are_ignored() {
    init_tracing();

    let (alice, _outgoing) = TestParticipant::spawn_detached("alice", test_config());
    let mut bob = ManualPeer::new("bob", &alice.id).await;
    bob.create_offer().await;

    for candidate in bob.take_candidates() {
        alice
            .handle
            .signal(SignalMessage::IceCandidate {
                from: bob.id.clone(),
                target: "carol".into(),
                candidate,
            })
            .await
            .unwrap();
    }

    assert!(alice.snapshot().await.peers.is_empty());
    assert_eq!(alice.factory.connections_created(&bob.id), 0);
}
