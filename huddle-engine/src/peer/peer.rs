use anyhow::Result;
use huddle_core::{ConnectionState, IceServerConfig, MediaKind, ParticipantId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::negotiation::{NegotiationCoordinator, NegotiationState};
use crate::transport::{
    ConnectionFactory, MediaConnection, PeerHandle, TransceiverHandle, TransportEvent,
};

/// Deadlines armed by peers and delivered back to the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    NegotiationDue(PeerHandle),
    IceRestartExpired(PeerHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The participant left the room.
    Left,
    /// Replaced by a fresh connection after a structural failure.
    Recreated,
    /// ICE could not be (re)established.
    ConnectivityFailure,
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownReason::Left => "left",
            TeardownReason::Recreated => "recreated",
            TeardownReason::ConnectivityFailure => "connectivity failure",
            TeardownReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a peer, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub participant_id: ParticipantId,
    pub epoch: u64,
    pub polite: bool,
    pub negotiation: NegotiationState,
    pub offer_in_flight: bool,
    pub connection: ConnectionState,
    pub transceivers: usize,
    pub buffered_candidates: usize,
}

/// One connection to one remote participant, with its two fixed
/// transceivers and everything scheduled on its behalf.
pub struct Peer {
    handle: PeerHandle,
    connection: Arc<dyn MediaConnection>,
    audio: TransceiverHandle,
    video: TransceiverHandle,
    coordinator: NegotiationCoordinator,
    state: ConnectionState,
    ice_restart_attempted: bool,
    negotiation_timer: Option<JoinHandle<()>>,
    restart_timer: Option<JoinHandle<()>>,
}

impl Peer {
    /// Connect and reserve the audio and video m-lines. The transceivers
    /// created here are the only ones the connection will ever have.
    pub async fn open(
        handle: PeerHandle,
        polite: bool,
        factory: &dyn ConnectionFactory,
        ice_servers: &[IceServerConfig],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let connection = factory.connect(handle.clone(), ice_servers, events).await?;

        let transceivers = async {
            let audio = connection.add_transceiver(MediaKind::Audio).await?;
            let video = connection.add_transceiver(MediaKind::Video).await?;
            anyhow::Ok((audio, video))
        }
        .await;

        let (audio, video) = match transceivers {
            Ok(pair) => pair,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        Ok(Self {
            handle,
            connection,
            audio,
            video,
            coordinator: NegotiationCoordinator::new(polite),
            state: ConnectionState::New,
            ice_restart_attempted: false,
            negotiation_timer: None,
            restart_timer: None,
        })
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.handle.participant_id
    }

    pub fn connection(&self) -> &Arc<dyn MediaConnection> {
        &self.connection
    }

    pub fn audio(&self) -> &TransceiverHandle {
        &self.audio
    }

    pub fn video(&self) -> &TransceiverHandle {
        &self.video
    }

    pub fn coordinator(&self) -> &NegotiationCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut NegotiationCoordinator {
        &mut self.coordinator
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    pub(crate) fn ice_restart_attempted(&self) -> bool {
        self.ice_restart_attempted
    }

    pub(crate) fn set_ice_restart_attempted(&mut self, attempted: bool) {
        self.ice_restart_attempted = attempted;
    }

    /// (Re)start the debounce. A trigger inside the window pushes the offer
    /// back so a burst of changes produces one offer.
    pub(crate) fn arm_negotiation(
        &mut self,
        delay: Duration,
        timer_tx: &mpsc::UnboundedSender<TimerEvent>,
    ) {
        if let Some(timer) = self.negotiation_timer.take() {
            timer.abort();
        }
        self.negotiation_timer = Some(spawn_timer(
            delay,
            TimerEvent::NegotiationDue(self.handle.clone()),
            timer_tx.clone(),
        ));
    }

    pub(crate) fn arm_restart_deadline(
        &mut self,
        timeout: Duration,
        timer_tx: &mpsc::UnboundedSender<TimerEvent>,
    ) {
        self.cancel_restart_deadline();
        self.restart_timer = Some(spawn_timer(
            timeout,
            TimerEvent::IceRestartExpired(self.handle.clone()),
            timer_tx.clone(),
        ));
    }

    pub(crate) fn cancel_restart_deadline(&mut self) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.negotiation_timer.take() {
            timer.abort();
        }
        self.cancel_restart_deadline();
    }

    pub(crate) async fn snapshot(&self, buffered_candidates: usize) -> PeerSnapshot {
        PeerSnapshot {
            participant_id: self.handle.participant_id.clone(),
            epoch: self.handle.epoch,
            polite: self.coordinator.polite(),
            negotiation: self.coordinator.state(),
            offer_in_flight: self.coordinator.offer_in_flight(),
            connection: self.state,
            transceivers: self.connection.transceiver_count().await,
            buffered_candidates,
        }
    }

    /// Cancel everything scheduled for this peer and close the connection.
    pub async fn close(mut self) {
        self.cancel_timers();
        match self.connection.close().await {
            Ok(()) => debug!("Connection {} closed", self.handle),
            Err(e) => warn!("Failed to close connection {}: {:#}", self.handle, e),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

fn spawn_timer(
    delay: Duration,
    event: TimerEvent,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = timer_tx.send(event);
    })
}
