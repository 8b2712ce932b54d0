use huddle_core::{IceCandidate, MediaKind, ParticipantId, SessionDescription, SignalMessage};
use huddle_engine::transport::{MediaConnection, PeerHandle, TransportEvent};
use huddle_engine::{EngineHandle, LoopbackConnection};
use tokio::sync::mpsc;

/// The far end of one connection, driven step by step by the test.
pub struct ManualPeer {
    pub id: ParticipantId,
    target: ParticipantId,
    pub connection: LoopbackConnection,
    events: mpsc::Receiver<TransportEvent>,
}

impl ManualPeer {
    /// A connection owned by `id` towards the engine `target`, with the same
    /// audio-then-video layout the engine uses.
    pub async fn new(id: &str, target: &ParticipantId) -> Self {
        let (tx, events) = mpsc::channel(64);
        let handle = PeerHandle {
            participant_id: target.clone(),
            epoch: 1,
        };
        let connection = LoopbackConnection::new(handle, tx);
        connection.add_transceiver(MediaKind::Audio).await.unwrap();
        connection.add_transceiver(MediaKind::Video).await.unwrap();

        Self {
            id: ParticipantId::from(id),
            target: target.clone(),
            connection,
            events,
        }
    }

    pub async fn create_offer(&self) -> SessionDescription {
        let offer = self.connection.create_offer(false).await.unwrap();
        self.connection
            .set_local_description(offer.clone())
            .await
            .unwrap();
        offer
    }

    pub async fn answer(&self, offer: &str) -> SessionDescription {
        self.connection
            .set_remote_description(SessionDescription::offer(offer))
            .await
            .unwrap();
        let answer = self.connection.create_answer().await.unwrap();
        self.connection
            .set_local_description(answer.clone())
            .await
            .unwrap();
        answer
    }

    /// Candidates gathered since the last call.
    pub fn take_candidates(&mut self) -> Vec<IceCandidate> {
        let mut candidates = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let TransportEvent::CandidateGenerated(_, candidate) = event {
                candidates.push(candidate);
            }
        }
        candidates
    }

    pub fn offer_msg(&self, sdp: &str) -> SignalMessage {
        SignalMessage::Offer {
            from: self.id.clone(),
            target: self.target.clone(),
            sdp: sdp.to_owned(),
        }
    }

    pub fn answer_msg(&self, sdp: &str) -> SignalMessage {
        SignalMessage::Answer {
            from: self.id.clone(),
            target: self.target.clone(),
            sdp: sdp.to_owned(),
        }
    }

    pub async fn send_candidates(&self, engine: &EngineHandle, candidates: Vec<IceCandidate>) {
        for candidate in candidates {
            engine
                .signal(SignalMessage::IceCandidate {
                    from: self.id.clone(),
                    target: self.target.clone(),
                    candidate,
                })
                .await
                .unwrap();
        }
    }
}

/// Decode everything an engine has emitted so far.
pub fn drain_signals(outgoing: &mut mpsc::UnboundedReceiver<String>) -> Vec<SignalMessage> {
    let mut signals = Vec::new();
    while let Ok(text) = outgoing.try_recv() {
        signals.push(serde_json::from_str(&text).expect("engine emitted invalid JSON"));
    }
    signals
}

pub fn offers(signals: &[SignalMessage]) -> Vec<String> {
    signals
        .iter()
        .filter_map(|msg| match msg {
            SignalMessage::Offer { sdp, .. } => Some(sdp.clone()),
            _ => None,
        })
        .collect()
}

pub fn answers(signals: &[SignalMessage]) -> Vec<String> {
    signals
        .iter()
        .filter_map(|msg| match msg {
            SignalMessage::Answer { sdp, .. } => Some(sdp.clone()),
            _ => None,
        })
        .collect()
}
