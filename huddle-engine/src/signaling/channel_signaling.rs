use async_trait::async_trait;
use huddle_core::{IceCandidate, ParticipantId, SignalMessage};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::signaling::SignalingOutput;

/// Serializes outgoing signals as JSON onto a channel the host pumps into
/// its websocket.
#[derive(Clone)]
pub struct ChannelSignaling {
    local_id: ParticipantId,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSignaling {
    pub fn new(local_id: ParticipantId) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local_id, tx }, rx)
    }

    pub fn send_signal(&self, msg: SignalMessage) {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if self.tx.send(json).is_err() {
                    warn!("Signaling channel closed, dropped message for {:?}", msg.target());
                }
            }
            Err(e) => error!("Failed to serialize signal message: {}", e),
        }
    }
}

#[async_trait]
impl SignalingOutput for ChannelSignaling {
    async fn send_offer(&self, target: ParticipantId, sdp: String) {
        self.send_signal(SignalMessage::Offer {
            from: self.local_id.clone(),
            target,
            sdp,
        });
    }

    async fn send_answer(&self, target: ParticipantId, sdp: String) {
        self.send_signal(SignalMessage::Answer {
            from: self.local_id.clone(),
            target,
            sdp,
        });
    }

    async fn send_ice(&self, target: ParticipantId, candidate: IceCandidate) {
        self.send_signal(SignalMessage::IceCandidate {
            from: self.local_id.clone(),
            target,
            candidate,
        });
    }
}
