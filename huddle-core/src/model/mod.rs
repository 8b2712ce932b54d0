mod media;
mod participant;
mod session;
mod signaling;

pub use media::{CaptureSource, MediaKind};
pub use participant::ParticipantId;
pub use session::{ConnectionState, SdpType, SessionDescription, SignalingState};
pub use signaling::{IceCandidate, IceServerConfig, SignalMessage};
