use anyhow::Result;
use async_trait::async_trait;
use huddle_core::{
    IceCandidate, IceServerConfig, MediaKind, ParticipantId, SessionDescription, SignalingState,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::LocalTrack;
use crate::transport::TransportEvent;

/// Identity of one incarnation of a peer. A recreated peer keeps its
/// participant id but gets a new epoch, so events from the old connection
/// can be told apart and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    pub participant_id: ParticipantId,
    pub epoch: u64,
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.participant_id, self.epoch)
    }
}

/// A media-line slot on a connection, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransceiverHandle {
    pub index: usize,
    pub kind: MediaKind,
}

/// One peer connection as the negotiation core drives it.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Add a send-receive transceiver.
    async fn add_transceiver(&self, kind: MediaKind) -> Result<TransceiverHandle>;

    async fn transceiver_count(&self) -> usize;

    /// Bind `track` (or nothing) to the transceiver's sender without touching
    /// its direction or existence.
    async fn replace_track(
        &self,
        transceiver: &TransceiverHandle,
        track: Option<&LocalTrack>,
    ) -> Result<()>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Discard the pending local offer and return to `stable`.
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    fn signaling_state(&self) -> SignalingState;

    async fn close(&self) -> Result<()>;
}

/// Builds connections. Every event the connection produces is tagged with
/// `peer` and sent on `events`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        peer: PeerHandle,
        ice_servers: &[IceServerConfig],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaConnection>>;
}
