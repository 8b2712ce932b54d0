use huddle_core::MediaKind;

use crate::media::RemoteTrack;

/// What merging an incoming track did to a participant's stream.
#[derive(Debug)]
pub enum MergeOutcome {
    /// The same track was reported again and was ignored.
    Duplicate,
    Added,
    /// The participant's previous track of that kind was swapped out.
    Replaced(RemoteTrack),
}

/// The media received from one participant: at most one track per kind.
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    audio: Option<RemoteTrack>,
    video: Option<RemoteTrack>,
}

impl RemoteStream {
    pub fn merge(&mut self, track: RemoteTrack) -> MergeOutcome {
        let slot = match track.kind() {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        };
        if slot.as_ref().is_some_and(|current| current.id() == track.id()) {
            return MergeOutcome::Duplicate;
        }
        match slot.replace(track) {
            Some(previous) => MergeOutcome::Replaced(previous),
            None => MergeOutcome::Added,
        }
    }

    pub fn audio(&self) -> Option<&RemoteTrack> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&RemoteTrack> {
        self.video.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    pub fn into_tracks(self) -> Vec<RemoteTrack> {
        self.audio.into_iter().chain(self.video).collect()
    }
}
