use huddle_core::{CaptureSource, ParticipantId};
use thiserror::Error;

use crate::negotiation::NegotiationState;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The connection backend rejected an operation.
    #[error("backend error for {participant}: {message}")]
    Backend {
        participant: ParticipantId,
        message: String,
    },

    /// Description application failed because the media-line structure no
    /// longer matches. Only recoverable by recreating the peer.
    #[error("media-line structure mismatch for {participant}: {message}")]
    Structural {
        participant: ParticipantId,
        message: String,
    },

    #[error("no transition from {state:?} on {event}")]
    InvalidTransition {
        state: NegotiationState,
        event: &'static str,
    },

    #[error("unknown peer {0}")]
    UnknownPeer(ParticipantId),

    /// The backend could not roll back a local offer. Only a fresh
    /// connection can take the remote offer.
    #[error("rollback rejected for {participant}: {message}")]
    RollbackRejected {
        participant: ParticipantId,
        message: String,
    },

    #[error("engine channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// Classify a backend failure, promoting media-line-order errors to
    /// [`EngineError::Structural`].
    pub fn from_backend(participant: &ParticipantId, err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        if is_media_line_mismatch(&message) {
            EngineError::Structural {
                participant: participant.clone(),
                message,
            }
        } else {
            EngineError::Backend {
                participant: participant.clone(),
                message,
            }
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, EngineError::Structural { .. })
    }

    /// Whether the failed operation can only succeed on a new connection.
    pub fn needs_fresh_peer(&self) -> bool {
        matches!(
            self,
            EngineError::Structural { .. } | EngineError::RollbackRejected { .. }
        )
    }
}

/// Whether an error message describes an m-line order or count violation.
pub fn is_media_line_mismatch(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["m-line", "mline", "m line", "media section"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission to use the {0} was denied")]
    PermissionDenied(CaptureSource),

    #[error("the {0} is in use by another application")]
    Busy(CaptureSource),

    #[error("no {0} available")]
    NotFound(CaptureSource),

    #[error("{source_kind} capture failed: {message}")]
    Other {
        source_kind: CaptureSource,
        message: String,
    },
}

impl DeviceError {
    pub fn source_kind(&self) -> CaptureSource {
        match self {
            DeviceError::PermissionDenied(source)
            | DeviceError::Busy(source)
            | DeviceError::NotFound(source) => *source,
            DeviceError::Other { source_kind, .. } => *source_kind,
        }
    }
}
