use async_trait::async_trait;
use huddle_core::{IceCandidate, ParticipantId};

/// Implemented by the host's signaling transport so the engine can reach a
/// specific remote participant. Delivery must be reliable and ordered.
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    async fn send_offer(&self, target: ParticipantId, sdp: String);

    async fn send_answer(&self, target: ParticipantId, sdp: String);

    async fn send_ice(&self, target: ParticipantId, candidate: IceCandidate);
}
