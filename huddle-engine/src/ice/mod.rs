use huddle_core::{IceCandidate, ParticipantId};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Candidates that arrived before their connection had a remote description.
pub struct IceCandidateBuffer {
    queues: HashMap<ParticipantId, VecDeque<IceCandidate>>,
    capacity: usize,
}

impl IceCandidateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn enqueue(&mut self, participant_id: &ParticipantId, candidate: IceCandidate) {
        let queue = self.queues.entry(participant_id.clone()).or_default();
        if queue.len() == self.capacity {
            queue.pop_front();
            warn!(
                "ICE buffer for {} is full, dropped the oldest candidate",
                participant_id
            );
        }
        queue.push_back(candidate);
    }

    /// Remove and return every buffered candidate in arrival order.
    pub fn drain(&mut self, participant_id: &ParticipantId) -> Vec<IceCandidate> {
        self.queues
            .remove(participant_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Drop a participant's queue without applying it.
    pub fn discard(&mut self, participant_id: &ParticipantId) -> usize {
        self.queues
            .remove(participant_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn len(&self, participant_id: &ParticipantId) -> usize {
        self.queues.get(participant_id).map_or(0, VecDeque::len)
    }
}
