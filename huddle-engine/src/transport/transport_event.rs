use huddle_core::{ConnectionState, IceCandidate};

use crate::media::RemoteTrack;
use crate::transport::PeerHandle;

/// Events a connection backend reports back to the engine loop.
#[derive(Debug)]
pub enum TransportEvent {
    CandidateGenerated(PeerHandle, IceCandidate),
    StateChanged(PeerHandle, ConnectionState),
    NegotiationNeeded(PeerHandle),
    Track(PeerHandle, RemoteTrack),
}

impl TransportEvent {
    pub fn peer(&self) -> &PeerHandle {
        match self {
            TransportEvent::CandidateGenerated(peer, _)
            | TransportEvent::StateChanged(peer, _)
            | TransportEvent::NegotiationNeeded(peer)
            | TransportEvent::Track(peer, _) => peer,
        }
    }
}
