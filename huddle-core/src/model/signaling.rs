use crate::model::participant::ParticipantId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

/// Messages exchanged over the room signaling channel.
///
/// `target` names the participant a directed message is meant for; `from`
/// is stamped by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d")]
pub enum SignalMessage {
    IceConfig {
        ice_servers: Vec<IceServerConfig>,
    },
    Presence {
        participants: Vec<ParticipantId>,
    },
    Offer {
        from: ParticipantId,
        target: ParticipantId,
        sdp: String,
    },
    Answer {
        from: ParticipantId,
        target: ParticipantId,
        sdp: String,
    },
    IceCandidate {
        from: ParticipantId,
        target: ParticipantId,
        candidate: IceCandidate,
    },
}

impl SignalMessage {
    /// Recipient of a directed message; `None` for room broadcasts.
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            SignalMessage::Offer { target, .. }
            | SignalMessage::Answer { target, .. }
            | SignalMessage::IceCandidate { target, .. } => Some(target),
            SignalMessage::IceConfig { .. } | SignalMessage::Presence { .. } => None,
        }
    }
}
