use dashmap::DashMap;
use huddle_core::ParticipantId;
use std::sync::Arc;

use crate::media::RemoteTrack;
use crate::peer::{MergeOutcome, RemoteStream};

/// Read view of the remote media currently received from each participant.
/// Cheap to clone and safe to share with the rendering layer; only the
/// engine loop writes to it.
#[derive(Clone, Default)]
pub struct MediaContext {
    streams: Arc<DashMap<ParticipantId, RemoteStream>>,
}

impl MediaContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn merge(&self, participant_id: &ParticipantId, track: RemoteTrack) -> MergeOutcome {
        self.streams
            .entry(participant_id.clone())
            .or_default()
            .merge(track)
    }

    /// Forget a participant's stream, returning the tracks it held.
    pub(crate) fn remove(&self, participant_id: &ParticipantId) -> Vec<RemoteTrack> {
        self.streams
            .remove(participant_id)
            .map(|(_, stream)| stream.into_tracks())
            .unwrap_or_default()
    }

    pub fn stream(&self, participant_id: &ParticipantId) -> Option<RemoteStream> {
        self.streams.get(participant_id).map(|entry| entry.clone())
    }

    pub fn audio(&self, participant_id: &ParticipantId) -> Option<RemoteTrack> {
        self.streams
            .get(participant_id)
            .and_then(|entry| entry.audio().cloned())
    }

    pub fn video(&self, participant_id: &ParticipantId) -> Option<RemoteTrack> {
        self.streams
            .get(participant_id)
            .and_then(|entry| entry.video().cloned())
    }

    pub fn list_participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.streams.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.streams.contains_key(participant_id)
    }
}
