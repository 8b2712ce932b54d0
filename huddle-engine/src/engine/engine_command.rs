use huddle_core::{ParticipantId, SignalMessage};
use tokio::sync::oneshot;

use crate::peer::PeerSnapshot;

/// Inputs to the engine loop.
#[derive(Debug)]
pub enum EngineCommand {
    /// Full list of participants currently in the room.
    Presence(Vec<ParticipantId>),

    /// A message received from the signaling channel.
    Signal(SignalMessage),

    SetMicrophone(bool),
    SetCamera(bool),
    StartScreenShare,
    StopScreenShare,

    /// The platform ended the screen share (e.g. its own "stop sharing"
    /// button).
    ScreenShareEnded,

    /// Capture devices or permissions changed.
    DevicesChanged,

    /// Keep a participant in focus regardless of audio; `None` unpins.
    Pin(Option<ParticipantId>),

    Inspect(oneshot::Sender<EngineSnapshot>),

    /// Release captures, close every connection and stop the loop.
    Leave,
}

/// State of the whole engine at one point of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub peers: Vec<PeerSnapshot>,
    pub mic_on: bool,
    pub camera_on: bool,
    pub screen_sharing: bool,
    pub outgoing_audio: Option<String>,
    pub outgoing_video: Option<String>,
}

impl EngineSnapshot {
    pub fn peer(&self, participant_id: &ParticipantId) -> Option<&PeerSnapshot> {
        self.peers
            .iter()
            .find(|peer| &peer.participant_id == participant_id)
    }
}
