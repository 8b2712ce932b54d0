//! In-process connection backend.
//!
//! Implements the offer/answer state machine over a small textual session
//! description with ordered m-lines, gathers deterministic host candidates
//! and walks the connection state forward once both descriptions and at
//! least one remote candidate are in place. No media flows. Used by headless
//! sessions and by tests, which can also inject failures.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use huddle_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaKind, ParticipantId, SdpType,
    SessionDescription, SignalingState,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::media::{LocalTrack, RemoteTrack};
use crate::transport::{
    ConnectionFactory, MediaConnection, PeerHandle, TransceiverHandle, TransportEvent,
};

const CANDIDATES_PER_GATHERING: u32 = 2;

/// Hands out [`LoopbackConnection`]s and remembers every one it created.
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    connections: Arc<DashMap<ParticipantId, Vec<Arc<LoopbackConnection>>>>,
    rejects_rollback: bool,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection this factory creates refuses to roll back a local
    /// offer, like webrtc-rs does.
    pub fn rejecting_rollback() -> Self {
        Self {
            rejects_rollback: true,
            ..Self::default()
        }
    }

    /// The most recent connection created towards `participant_id`.
    pub fn connection(&self, participant_id: &ParticipantId) -> Option<Arc<LoopbackConnection>> {
        self.connections
            .get(participant_id)
            .and_then(|list| list.last().cloned())
    }

    pub fn connections_created(&self, participant_id: &ParticipantId) -> usize {
        self.connections
            .get(participant_id)
            .map_or(0, |list| list.len())
    }
}

#[async_trait]
impl ConnectionFactory for LoopbackFactory {
    async fn connect(
        &self,
        peer: PeerHandle,
        _ice_servers: &[IceServerConfig],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaConnection>> {
        let connection = Arc::new(LoopbackConnection::new(peer.clone(), events));
        if self.rejects_rollback {
            connection.reject_rollbacks();
        }
        self.connections
            .entry(peer.participant_id.clone())
            .or_default()
            .push(Arc::clone(&connection));
        debug!("Loopback connection {} opened for {}", connection.session_id, peer);
        Ok(connection)
    }
}

struct Slot {
    kind: MediaKind,
    track: Option<String>,
}

struct Section {
    kind: MediaKind,
    msid: Option<(String, String)>,
}

struct ParsedSdp {
    session: Option<String>,
    ufrag: Option<String>,
    sections: Vec<Section>,
}

impl ParsedSdp {
    fn parse(sdp: &str) -> Result<Self> {
        if !sdp.starts_with("v=0") {
            bail!("not a session description");
        }

        let mut parsed = ParsedSdp {
            session: None,
            ufrag: None,
            sections: Vec::new(),
        };
        for line in sdp.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("m=") {
                let kind = match rest.split_whitespace().next() {
                    Some("audio") => MediaKind::Audio,
                    Some("video") => MediaKind::Video,
                    other => bail!("unsupported media kind {:?}", other),
                };
                parsed.sections.push(Section { kind, msid: None });
            } else if let Some(rest) = line.strip_prefix("o=") {
                parsed.session = rest.split_whitespace().nth(1).map(str::to_owned);
            } else if let Some(rest) = line.strip_prefix("a=ice-ufrag:") {
                parsed.ufrag = Some(rest.to_owned());
            } else if let Some(rest) = line.strip_prefix("a=msid:") {
                let mut parts = rest.split_whitespace();
                let (Some(stream), Some(track)) = (parts.next(), parts.next()) else {
                    bail!("malformed msid line {:?}", line);
                };
                let section = parsed
                    .sections
                    .last_mut()
                    .ok_or_else(|| anyhow!("msid line before the first m-line"))?;
                section.msid = Some((stream.to_owned(), track.to_owned()));
            }
        }
        Ok(parsed)
    }

    fn bound(&self) -> Vec<bool> {
        self.sections.iter().map(|s| s.msid.is_some()).collect()
    }
}

struct Inner {
    signaling: SignalingState,
    slots: Vec<Slot>,
    local: Option<SessionDescription>,
    stable_local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_session: Option<String>,
    remote_ufrag: Option<String>,
    negotiated: Vec<bool>,
    connection: ConnectionState,
    ice_generation: u32,
    gathered_generation: Option<u32>,
    applied: Vec<IceCandidate>,
    awaiting_restart: bool,
    blocked: bool,
    fail_next_remote: Option<String>,
    rejects_rollback: bool,
    offers_created: usize,
    version: u64,
    closed: bool,
}

impl Inner {
    fn needs_negotiation(&self) -> bool {
        if self.closed || self.signaling != SignalingState::Stable {
            return false;
        }
        self.slots.len() != self.negotiated.len()
            || self
                .slots
                .iter()
                .zip(&self.negotiated)
                .any(|(slot, negotiated)| slot.track.is_some() != *negotiated)
    }

    fn try_connect(&mut self) -> Option<ConnectionState> {
        let ready = !self.closed
            && !self.blocked
            && !self.awaiting_restart
            && self.local.is_some()
            && self.remote.is_some()
            && !self.applied.is_empty();
        if !ready || self.connection == ConnectionState::Connected {
            return None;
        }
        self.connection = ConnectionState::Connected;
        Some(ConnectionState::Connected)
    }

    fn check_kinds(&self, sections: &[Section]) -> Result<()> {
        if sections.len() != self.slots.len() {
            bail!(
                "m-line count mismatch: {} local, {} remote",
                self.slots.len(),
                sections.len()
            );
        }
        for (index, (slot, section)) in self.slots.iter().zip(sections).enumerate() {
            if slot.kind != section.kind {
                bail!(
                    "m-line order mismatch at index {}: expected {}, got {}",
                    index,
                    slot.kind,
                    section.kind
                );
            }
        }
        Ok(())
    }
}

/// A connection that negotiates with another loopback connection through
/// whatever signaling the engine uses.
pub struct LoopbackConnection {
    peer: PeerHandle,
    session_id: String,
    events: mpsc::Sender<TransportEvent>,
    inner: Mutex<Inner>,
}

impl LoopbackConnection {
    pub fn new(peer: PeerHandle, events: mpsc::Sender<TransportEvent>) -> Self {
        let mut session_id = Uuid::new_v4().simple().to_string();
        session_id.truncate(12);

        Self {
            peer,
            session_id,
            events,
            inner: Mutex::new(Inner {
                signaling: SignalingState::Stable,
                slots: Vec::new(),
                local: None,
                stable_local: None,
                remote: None,
                remote_session: None,
                remote_ufrag: None,
                negotiated: Vec::new(),
                connection: ConnectionState::New,
                ice_generation: 0,
                gathered_generation: None,
                applied: Vec::new(),
                awaiting_restart: false,
                blocked: false,
                fail_next_remote: None,
                rejects_rollback: false,
                offers_created: 0,
                version: 0,
                closed: false,
            }),
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Make the next `set_remote_description` fail with `message`.
    pub fn inject_remote_failure(&self, message: impl Into<String>) {
        self.inner().fail_next_remote = Some(message.into());
    }

    pub fn reject_rollbacks(&self) {
        self.inner().rejects_rollback = true;
    }

    /// Drop connectivity. A transient failure recovers after an ICE restart,
    /// a permanent one never reconnects.
    pub fn fail_connectivity(&self, permanent: bool) {
        {
            let mut inner = self.inner();
            inner.connection = ConnectionState::Failed;
            inner.awaiting_restart = true;
            inner.blocked = permanent;
        }
        self.emit(vec![TransportEvent::StateChanged(
            self.peer.clone(),
            ConnectionState::Failed,
        )]);
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner().applied.clone()
    }

    /// Track id bound to the first transceiver of `kind`.
    pub fn bound_track(&self, kind: MediaKind) -> Option<String> {
        self.inner()
            .slots
            .iter()
            .find(|slot| slot.kind == kind)
            .and_then(|slot| slot.track.clone())
    }

    pub fn slot_count(&self) -> usize {
        self.inner().slots.len()
    }

    pub fn offers_created(&self) -> usize {
        self.inner().offers_created
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner().connection
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner().remote.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(inner: &Inner) -> Result<()> {
        if inner.closed {
            bail!("connection closed");
        }
        Ok(())
    }

    fn ufrag(&self, generation: u32) -> String {
        format!("{}g{}", self.session_id, generation)
    }

    fn render(&self, inner: &mut Inner) -> String {
        inner.version += 1;
        let mut lines = vec![
            "v=0".to_owned(),
            format!("o=- {} {} IN IP4 127.0.0.1", self.session_id, inner.version),
            "s=huddle-loopback".to_owned(),
            "t=0 0".to_owned(),
            format!("a=ice-ufrag:{}", self.ufrag(inner.ice_generation)),
        ];
        for (index, slot) in inner.slots.iter().enumerate() {
            let payload = match slot.kind {
                MediaKind::Audio => 111,
                MediaKind::Video => 96,
            };
            lines.push(format!("m={} 9 UDP/TLS/RTP/SAVPF {}", slot.kind, payload));
            lines.push(format!("a=mid:{index}"));
            lines.push("a=sendrecv".to_owned());
            if let Some(track) = &slot.track {
                lines.push(format!("a=msid:{} {}", self.session_id, track));
            }
        }
        lines.push(String::new());
        lines.join("\r\n")
    }

    fn gather(&self, inner: &mut Inner, events: &mut Vec<TransportEvent>) {
        if inner.gathered_generation == Some(inner.ice_generation) {
            return;
        }
        let generation = inner.ice_generation;
        inner.gathered_generation = Some(generation);

        for n in 1..=CANDIDATES_PER_GATHERING {
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{generation}{n} 1 udp 2130706431 127.0.0.1 {} typ host ufrag {}",
                    50000 + generation * 10 + n,
                    self.ufrag(generation)
                ),
                sdp_mid: Some("0".to_owned()),
                sdp_m_line_index: Some(0),
            };
            events.push(TransportEvent::CandidateGenerated(
                self.peer.clone(),
                candidate,
            ));
        }

        if matches!(
            inner.connection,
            ConnectionState::New | ConnectionState::Failed | ConnectionState::Disconnected
        ) {
            inner.connection = ConnectionState::Connecting;
            events.push(TransportEvent::StateChanged(
                self.peer.clone(),
                ConnectionState::Connecting,
            ));
        }
    }

    fn finish(&self, inner: &mut Inner, events: &mut Vec<TransportEvent>) {
        if let Some(state) = inner.try_connect() {
            events.push(TransportEvent::StateChanged(self.peer.clone(), state));
        }
        if inner.needs_negotiation() {
            events.push(TransportEvent::NegotiationNeeded(self.peer.clone()));
        }
    }

    // Called from inside the engine loop, so never wait on a full channel.
    fn emit(&self, events: Vec<TransportEvent>) {
        for event in events {
            if let Err(e) = self.events.try_send(event) {
                warn!("Loopback {} dropped an event: {}", self.peer, e);
            }
        }
    }
}

#[async_trait]
impl MediaConnection for LoopbackConnection {
    async fn add_transceiver(&self, kind: MediaKind) -> Result<TransceiverHandle> {
        let mut events = Vec::new();
        let handle = {
            let mut inner = self.inner();
            Self::ensure_open(&inner)?;
            inner.slots.push(Slot { kind, track: None });
            if inner.needs_negotiation() {
                events.push(TransportEvent::NegotiationNeeded(self.peer.clone()));
            }
            TransceiverHandle {
                index: inner.slots.len() - 1,
                kind,
            }
        };
        self.emit(events);
        Ok(handle)
    }

    async fn transceiver_count(&self) -> usize {
        self.slot_count()
    }

    async fn replace_track(
        &self,
        transceiver: &TransceiverHandle,
        track: Option<&LocalTrack>,
    ) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner();
            Self::ensure_open(&inner)?;
            let slot = inner
                .slots
                .get_mut(transceiver.index)
                .ok_or_else(|| anyhow!("no transceiver at index {}", transceiver.index))?;
            if let Some(track) = track {
                if track.kind() != slot.kind {
                    bail!("cannot send a {} track on a {} sender", track.kind(), slot.kind);
                }
            }
            slot.track = track.map(|t| t.id().to_owned());
            if inner.needs_negotiation() {
                events.push(TransportEvent::NegotiationNeeded(self.peer.clone()));
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let mut inner = self.inner();
        Self::ensure_open(&inner)?;
        if ice_restart {
            inner.ice_generation += 1;
            inner.awaiting_restart = false;
        }
        inner.offers_created += 1;
        let sdp = self.render(&mut inner);
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut inner = self.inner();
        Self::ensure_open(&inner)?;
        if inner.signaling != SignalingState::HaveRemoteOffer {
            bail!("no remote offer to answer in {}", inner.signaling);
        }
        let sdp = self.render(&mut inner);
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let parsed = ParsedSdp::parse(&desc.sdp)?;
        let mut events = Vec::new();
        {
            let mut inner = self.inner();
            Self::ensure_open(&inner)?;
            match desc.sdp_type {
                SdpType::Offer => {
                    if inner.signaling != SignalingState::Stable {
                        bail!("cannot apply a local offer in {}", inner.signaling);
                    }
                    inner.signaling = SignalingState::HaveLocalOffer;
                    inner.stable_local = inner.local.take();
                    inner.local = Some(desc);
                }
                SdpType::Answer => {
                    if inner.signaling != SignalingState::HaveRemoteOffer {
                        bail!("cannot apply a local answer in {}", inner.signaling);
                    }
                    inner.signaling = SignalingState::Stable;
                    inner.negotiated = parsed.bound();
                    inner.local = Some(desc);
                }
            }
            self.gather(&mut inner, &mut events);
            self.finish(&mut inner, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner();
            Self::ensure_open(&inner)?;
            if let Some(message) = inner.fail_next_remote.take() {
                bail!(message);
            }

            let parsed = ParsedSdp::parse(&desc.sdp)?;
            inner.check_kinds(&parsed.sections)?;

            match desc.sdp_type {
                SdpType::Offer => {
                    if inner.signaling != SignalingState::Stable {
                        bail!("cannot apply a remote offer in {}", inner.signaling);
                    }
                    inner.signaling = SignalingState::HaveRemoteOffer;
                }
                SdpType::Answer => {
                    if inner.signaling != SignalingState::HaveLocalOffer {
                        bail!("cannot apply a remote answer in {}", inner.signaling);
                    }
                    let offered = inner
                        .local
                        .as_ref()
                        .map(|local| ParsedSdp::parse(&local.sdp))
                        .transpose()?
                        .map(|local| local.bound())
                        .unwrap_or_default();
                    inner.signaling = SignalingState::Stable;
                    inner.negotiated = offered;
                    inner.stable_local = None;
                }
            }

            // A new remote session (the other side rebuilt its connection) or
            // an ICE restart offer invalidates our candidates.
            let new_session =
                inner.remote_session.is_some() && inner.remote_session != parsed.session;
            let restarted = desc.sdp_type == SdpType::Offer
                && inner.remote_ufrag.is_some()
                && inner.remote_ufrag != parsed.ufrag;
            if new_session || restarted {
                inner.ice_generation += 1;
                inner.awaiting_restart = false;
            }
            inner.remote_session = parsed.session.clone();
            inner.remote_ufrag = parsed.ufrag.clone();
            inner.remote = Some(desc);

            // An offer is answered through set_local_description, which
            // gathers. After an answer nothing else will.
            if inner.signaling == SignalingState::Stable && inner.local.is_some() {
                self.gather(&mut inner, &mut events);
            }

            for section in &parsed.sections {
                if let Some((stream, track)) = &section.msid {
                    events.push(TransportEvent::Track(
                        self.peer.clone(),
                        RemoteTrack::new(track.clone(), section.kind, stream.clone()),
                    ));
                }
            }
            self.finish(&mut inner, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner();
        Self::ensure_open(&inner)?;
        if inner.signaling != SignalingState::HaveLocalOffer {
            bail!("nothing to roll back in {}", inner.signaling);
        }
        if inner.rejects_rollback {
            bail!(
                "invalid proposed signaling state transition from {} applying local rollback",
                inner.signaling
            );
        }
        inner.signaling = SignalingState::Stable;
        inner.local = inner.stable_local.take();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner();
            Self::ensure_open(&inner)?;
            if inner.remote.is_none() {
                bail!("remote description not set");
            }
            if !candidate.candidate.starts_with("candidate:") {
                bail!("malformed candidate {:?}", candidate.candidate);
            }
            inner.applied.push(candidate);
            if let Some(state) = inner.try_connect() {
                events.push(TransportEvent::StateChanged(self.peer.clone(), state));
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.inner().remote.is_some()
    }

    fn signaling_state(&self) -> SignalingState {
        self.inner().signaling
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner();
        inner.closed = true;
        inner.signaling = SignalingState::Closed;
        inner.connection = ConnectionState::Closed;
        Ok(())
    }
}
