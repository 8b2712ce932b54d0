use huddle_core::{ConnectionState, ParticipantId};

use crate::error::DeviceError;
use crate::media::RemoteTrack;
use crate::peer::TeardownReason;

/// Things the host may want to show the user.
#[derive(Debug, Clone)]
pub enum EngineNotification {
    /// A capture could not be opened; the feature was turned off.
    DeviceFailure(DeviceError),
    RemoteTrackAdded {
        participant_id: ParticipantId,
        track: RemoteTrack,
    },
    RemoteTrackRemoved {
        participant_id: ParticipantId,
        track: RemoteTrack,
    },
    PeerStateChanged {
        participant_id: ParticipantId,
        state: ConnectionState,
    },
    /// The connection was rebuilt after a structural negotiation failure.
    PeerRecreated { participant_id: ParticipantId },
    PeerRemoved {
        participant_id: ParticipantId,
        reason: TeardownReason,
    },
}
