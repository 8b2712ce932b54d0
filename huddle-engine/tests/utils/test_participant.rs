use huddle_core::{ConnectionState, ParticipantId};
use huddle_engine::{
    ChannelSignaling, EngineConfig, EngineHandle, EngineNotification, EngineSnapshot,
    LoopbackConnection, LoopbackFactory, MeshEngine, NegotiationState, PeerSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;

use crate::utils::{MockDevices, SignalRouter};

/// One engine on loopback connections and mock devices, wired to a router.
pub struct TestParticipant {
    pub id: ParticipantId,
    pub handle: EngineHandle,
    pub factory: LoopbackFactory,
    pub devices: MockDevices,
    pub notifications: broadcast::Receiver<EngineNotification>,
}

impl TestParticipant {
    pub fn spawn(router: &SignalRouter, id: &str) -> Self {
        Self::spawn_with_config(router, id, test_config())
    }

    pub fn spawn_with_config(router: &SignalRouter, id: &str, config: EngineConfig) -> Self {
        let (participant, outgoing) = Self::spawn_detached(id, config);
        router.connect(participant.id.clone(), participant.handle.clone(), outgoing);
        participant
    }

    /// An engine whose outgoing signals go to the returned receiver instead
    /// of a router, for tests that play the remote side by hand.
    pub fn spawn_detached(
        id: &str,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::spawn_detached_on(id, config, LoopbackFactory::new())
    }

    pub fn spawn_detached_on(
        id: &str,
        config: EngineConfig,
        factory: LoopbackFactory,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let id = ParticipantId::from(id);
        let devices = MockDevices::new();
        let (signaling, outgoing) = ChannelSignaling::new(id.clone());

        let (engine, handle) = MeshEngine::new(
            id.clone(),
            config,
            Arc::new(factory.clone()),
            Arc::new(devices.clone()),
            Arc::new(signaling),
        );
        let notifications = handle.notifications();

        tokio::spawn(async move {
            engine.run().await;
        });

        let participant = Self {
            id,
            handle,
            factory,
            devices,
            notifications,
        };
        (participant, outgoing)
    }

    /// Latest connection this participant opened towards `remote`.
    pub fn connection_to(&self, remote: &TestParticipant) -> Arc<LoopbackConnection> {
        self.factory
            .connection(&remote.id)
            .unwrap_or_else(|| panic!("{} has no connection to {}", self.id, remote.id))
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.handle.snapshot().await.expect("engine stopped")
    }

    pub async fn peer(&self, remote: &TestParticipant) -> Option<PeerSnapshot> {
        self.peer_by_id(&remote.id).await
    }

    pub async fn peer_by_id(&self, remote: &ParticipantId) -> Option<PeerSnapshot> {
        self.snapshot().await.peer(remote).cloned()
    }

    /// Every notification received since the last call.
    pub fn drain_notifications(&mut self) -> Vec<EngineNotification> {
        let mut received = Vec::new();
        loop {
            match self.notifications.try_recv() {
                Ok(notification) => received.push(notification),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return received,
            }
        }
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        ice_servers: Vec::new(),
        ..EngineConfig::default()
    }
}

/// Let messages and timers play out. Tests run on a paused clock, so this
/// costs no wall time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

/// Announce the same room to everyone and wait for negotiation to finish.
pub async fn join_room(participants: &[&TestParticipant]) {
    let ids: Vec<ParticipantId> = participants.iter().map(|p| p.id.clone()).collect();
    for participant in participants {
        participant
            .handle
            .presence(ids.clone())
            .await
            .expect("engine stopped");
    }
    settle().await;
}

/// Both directions are stable, connected and hold exactly two transceivers.
pub async fn assert_converged(a: &TestParticipant, b: &TestParticipant) {
    for (local, remote) in [(a, b), (b, a)] {
        let peer = local
            .peer(remote)
            .await
            .unwrap_or_else(|| panic!("{} has no peer for {}", local.id, remote.id));
        assert_eq!(
            peer.negotiation,
            NegotiationState::Stable,
            "{} -> {} not stable",
            local.id,
            remote.id
        );
        assert!(!peer.offer_in_flight, "{} -> {} offer in flight", local.id, remote.id);
        assert_eq!(
            peer.connection,
            ConnectionState::Connected,
            "{} -> {} not connected",
            local.id,
            remote.id
        );
        assert_eq!(peer.transceivers, 2);
        assert_eq!(local.connection_to(remote).slot_count(), 2);
    }
}
