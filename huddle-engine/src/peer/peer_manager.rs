use futures::future::join_all;
use huddle_core::{
    ConnectionState, IceCandidate, IceServerConfig, ParticipantId, SessionDescription,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::MediaContext;
use crate::engine::EngineNotification;
use crate::error::{EngineError, Result};
use crate::ice::IceCandidateBuffer;
use crate::media::{RemoteTrack, TrackController};
use crate::negotiation::{OfferDecision, RemoteAnswerDecision, RemoteOfferDecision};
use crate::peer::{MergeOutcome, Peer, PeerSnapshot, TeardownReason, TimerEvent};
use crate::signaling::SignalingOutput;
use crate::speaker::{AudioAnalyser, SpeakerCommand};
use crate::transport::{ConnectionFactory, MediaConnection, PeerHandle, TransportEvent};

/// Keeps one [`Peer`] per present remote participant and drives each
/// through negotiation, candidate exchange and repair.
///
/// Every method runs on the engine loop. Events carrying a [`PeerHandle`]
/// whose epoch no longer matches the live peer are dropped.
pub struct PeerConnectionManager {
    local_id: ParticipantId,
    config: EngineConfig,
    factory: Arc<dyn ConnectionFactory>,
    signaling: Arc<dyn SignalingOutput>,
    peers: HashMap<ParticipantId, Peer>,
    presence: BTreeSet<ParticipantId>,
    candidates: IceCandidateBuffer,
    next_epoch: u64,
    transport_tx: mpsc::Sender<TransportEvent>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    speaker_tx: mpsc::UnboundedSender<SpeakerCommand>,
    notifications: broadcast::Sender<EngineNotification>,
    media: MediaContext,
}

impl PeerConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: ParticipantId,
        config: EngineConfig,
        factory: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn SignalingOutput>,
        transport_tx: mpsc::Sender<TransportEvent>,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
        speaker_tx: mpsc::UnboundedSender<SpeakerCommand>,
        notifications: broadcast::Sender<EngineNotification>,
        media: MediaContext,
    ) -> Self {
        let candidates = IceCandidateBuffer::new(config.max_buffered_candidates);
        Self {
            local_id,
            config,
            factory,
            signaling,
            peers: HashMap::new(),
            presence: BTreeSet::new(),
            candidates,
            next_epoch: 1,
            transport_tx,
            timer_tx,
            speaker_tx,
            notifications,
            media,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn peer(&self, participant_id: &ParticipantId) -> Option<&Peer> {
        self.peers.get(participant_id)
    }

    pub fn peers(&self) -> Vec<&Peer> {
        self.peers.values().collect()
    }

    pub fn presence(&self) -> &BTreeSet<ParticipantId> {
        &self.presence
    }

    /// Servers used for peers created from now on.
    pub fn set_ice_servers(&mut self, ice_servers: Vec<IceServerConfig>) {
        self.config.ice_servers = ice_servers;
    }

    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.peers.len());
        for peer in self.peers.values() {
            let buffered = self.candidates.len(peer.participant_id());
            snapshots.push(peer.snapshot(buffered).await);
        }
        snapshots.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        snapshots
    }

    /// Bring the peer set in line with the room. Applying the same set twice
    /// changes nothing. Missing peers are (re)created, which is also how a
    /// peer torn down after a connectivity failure comes back.
    pub async fn on_presence_update(
        &mut self,
        participants: Vec<ParticipantId>,
        tracks: &TrackController,
    ) {
        let present: BTreeSet<ParticipantId> = participants
            .into_iter()
            .filter(|id| *id != self.local_id)
            .collect();

        let departed: Vec<ParticipantId> = self
            .peers
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for id in departed {
            self.teardown_peer(&id, TeardownReason::Left).await;
        }

        self.presence = present;
        let missing: Vec<ParticipantId> = self
            .presence
            .iter()
            .filter(|id| !self.peers.contains_key(*id))
            .cloned()
            .collect();
        for id in missing {
            if let Err(e) = self.create_peer(id, tracks).await {
                error!("Failed to create peer: {}", e);
            }
        }
    }

    pub async fn create_peer(
        &mut self,
        participant_id: ParticipantId,
        tracks: &TrackController,
    ) -> Result<()> {
        let handle = PeerHandle {
            participant_id: participant_id.clone(),
            epoch: self.next_epoch,
        };
        self.next_epoch += 1;
        let polite = self.local_id.is_polite_towards(&participant_id);

        let peer = Peer::open(
            handle.clone(),
            polite,
            self.factory.as_ref(),
            &self.config.ice_servers,
            self.transport_tx.clone(),
        )
        .await
        .map_err(|e| EngineError::from_backend(&participant_id, e))?;

        info!(
            "Peer {} created ({})",
            handle,
            if polite { "polite" } else { "impolite" }
        );

        if let Err(e) = tracks.apply_local_tracks(&peer).await {
            warn!("Failed to bind local tracks for {}: {:#}", handle, e);
        }
        self.peers.insert(participant_id, peer);
        Ok(())
    }

    /// Single exit path for a peer: timers, connection, buffered candidates,
    /// audio analysis and received media all go together.
    pub async fn teardown_peer(
        &mut self,
        participant_id: &ParticipantId,
        reason: TeardownReason,
    ) -> bool {
        let Some(peer) = self.peers.remove(participant_id) else {
            return false;
        };
        info!("Tearing down peer {} ({})", peer.handle(), reason);
        peer.close().await;
        self.release_peer_resources(participant_id);

        if reason != TeardownReason::Recreated {
            self.notify(EngineNotification::PeerRemoved {
                participant_id: participant_id.clone(),
                reason,
            });
        }
        true
    }

    pub async fn recreate_peer(&mut self, participant_id: &ParticipantId, tracks: &TrackController) {
        self.teardown_peer(participant_id, TeardownReason::Recreated)
            .await;
        match self.create_peer(participant_id.clone(), tracks).await {
            Ok(()) => self.notify(EngineNotification::PeerRecreated {
                participant_id: participant_id.clone(),
            }),
            Err(e) => {
                error!("Failed to recreate peer: {}", e);
                self.notify(EngineNotification::PeerRemoved {
                    participant_id: participant_id.clone(),
                    reason: TeardownReason::Recreated,
                });
            }
        }
    }

    /// Close every connection at once. Used when leaving the room.
    pub async fn shutdown(&mut self) {
        let peers: Vec<Peer> = self.peers.drain().map(|(_, peer)| peer).collect();
        let ids: Vec<ParticipantId> = peers.iter().map(|p| p.participant_id().clone()).collect();

        join_all(peers.into_iter().map(Peer::close)).await;

        for id in ids {
            self.release_peer_resources(&id);
            self.notify(EngineNotification::PeerRemoved {
                participant_id: id,
                reason: TeardownReason::Shutdown,
            });
        }
        self.presence.clear();
    }

    fn release_peer_resources(&mut self, participant_id: &ParticipantId) {
        let discarded = self.candidates.discard(participant_id);
        if discarded > 0 {
            debug!(
                "Discarded {} buffered candidates for {}",
                discarded, participant_id
            );
        }
        let _ = self
            .speaker_tx
            .send(SpeakerCommand::Detach(participant_id.clone()));
        for track in self.media.remove(participant_id) {
            self.notify(EngineNotification::RemoteTrackRemoved {
                participant_id: participant_id.clone(),
                track,
            });
        }
    }

    pub async fn apply_local_tracks_all(&self, tracks: &TrackController) {
        for peer in self.peers.values() {
            if let Err(e) = tracks.apply_local_tracks(peer).await {
                warn!("Failed to apply local tracks to {}: {:#}", peer.handle(), e);
            }
        }
    }

    // ---- negotiation --------------------------------------------------

    pub fn on_negotiation_needed(&mut self, handle: &PeerHandle) {
        let debounce = self.config.negotiation_debounce;
        let Some(peer) = live_peer(&mut self.peers, handle) else {
            return;
        };
        debug!("Negotiation requested for {}", handle);
        peer.coordinator_mut().request();
        peer.arm_negotiation(debounce, &self.timer_tx);
    }

    pub async fn on_negotiation_due(&mut self, handle: &PeerHandle, tracks: &TrackController) {
        let Some(peer) = live_peer(&mut self.peers, handle) else {
            return;
        };

        let ice_restart = match peer.coordinator_mut().on_debounce() {
            OfferDecision::Create { ice_restart } => ice_restart,
            OfferDecision::Skip(reason) => {
                debug!("Skipping negotiation for {}: {:?}", handle, reason);
                return;
            }
        };

        let connection = Arc::clone(peer.connection());
        let offer = async {
            let offer = connection.create_offer(ice_restart).await?;
            connection.set_local_description(offer.clone()).await?;
            anyhow::Ok(offer)
        }
        .await;

        match offer {
            Ok(offer) => {
                if let Err(e) = peer.coordinator_mut().local_offer_applied() {
                    warn!("Offer for {} applied out of order: {}", handle, e);
                }
                debug!(
                    "Sending offer to {}{}",
                    handle,
                    if ice_restart { " (ICE restart)" } else { "" }
                );
                self.signaling
                    .send_offer(handle.participant_id.clone(), offer.sdp)
                    .await;
            }
            Err(e) => {
                peer.coordinator_mut().offer_failed(ice_restart);
                let err = EngineError::from_backend(&handle.participant_id, e);
                self.handle_negotiation_error(&handle.participant_id, err, tracks)
                    .await;
            }
        }
    }

    pub async fn on_remote_offer(
        &mut self,
        from: ParticipantId,
        sdp: String,
        tracks: &TrackController,
    ) {
        if !self.ensure_peer(&from, tracks).await {
            return;
        }

        match self.accept_offer(&from, &sdp).await {
            Ok(()) => {}
            Err(err) if err.needs_fresh_peer() => {
                // The offer itself is fine for a connection without history,
                // so answer it on the replacement.
                warn!("{}; recreating the peer", err);
                self.recreate_peer(&from, tracks).await;
                if let Err(err) = self.accept_offer(&from, &sdp).await {
                    error!("Offer from {} failed on a fresh peer: {}", from, err);
                }
            }
            Err(err) => self.handle_negotiation_error(&from, err, tracks).await,
        }
    }

    async fn accept_offer(&mut self, from: &ParticipantId, sdp: &str) -> Result<()> {
        let debounce = self.config.negotiation_debounce;
        let Some(peer) = self.peers.get_mut(from) else {
            return Err(EngineError::UnknownPeer(from.clone()));
        };
        let connection = Arc::clone(peer.connection());
        let backend = |e| EngineError::from_backend(from, e);

        match peer.coordinator().on_remote_offer() {
            RemoteOfferDecision::Ignore => {
                info!("Ignoring colliding offer from {}", from);
                return Ok(());
            }
            RemoteOfferDecision::Accept { rollback: true } => {
                debug!("Rolling back local offer to accept {}'s offer", from);
                connection
                    .rollback()
                    .await
                    .map_err(|e| EngineError::RollbackRejected {
                        participant: from.clone(),
                        message: format!("{e:#}"),
                    })?;
                if let Err(e) = peer.coordinator_mut().rolled_back() {
                    warn!("Rollback for {} out of order: {}", from, e);
                }
            }
            RemoteOfferDecision::Accept { rollback: false } => {}
        }

        connection
            .set_remote_description(SessionDescription::offer(sdp.to_owned()))
            .await
            .map_err(backend)?;
        if let Err(e) = peer.coordinator_mut().remote_offer_applied() {
            warn!("Remote offer for {} applied out of order: {}", from, e);
        }
        Self::drain_candidates(&mut self.candidates, &connection, from).await;

        let answer = async {
            let answer = connection.create_answer().await?;
            connection.set_local_description(answer.clone()).await?;
            anyhow::Ok(answer)
        }
        .await
        .map_err(backend)?;

        let reschedule = match peer.coordinator_mut().answer_sent() {
            Ok(reschedule) => reschedule,
            Err(e) => {
                warn!("Answer for {} sent out of order: {}", from, e);
                false
            }
        };
        if reschedule {
            peer.arm_negotiation(debounce, &self.timer_tx);
        }

        debug!("Sending answer to {}", from);
        self.signaling.send_answer(from.clone(), answer.sdp).await;
        Ok(())
    }

    pub async fn on_remote_answer(
        &mut self,
        from: ParticipantId,
        sdp: String,
        tracks: &TrackController,
    ) {
        if !self.ensure_peer(&from, tracks).await {
            return;
        }
        let debounce = self.config.negotiation_debounce;
        let Some(peer) = self.peers.get_mut(&from) else {
            return;
        };

        if peer.coordinator().on_remote_answer() == RemoteAnswerDecision::Stale {
            debug!(
                "Dropping stale answer from {} in {:?}",
                from,
                peer.coordinator().state()
            );
            return;
        }

        let connection = Arc::clone(peer.connection());
        if let Err(e) = connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            let err = EngineError::from_backend(&from, e);
            if err.is_structural() {
                self.handle_negotiation_error(&from, err, tracks).await;
                return;
            }

            warn!("Remote answer from {} rejected: {}", from, err);
            match connection.rollback().await {
                Ok(()) => {
                    if let Err(e) = peer.coordinator_mut().offer_abandoned() {
                        warn!("Abandoned offer for {} out of order: {}", from, e);
                    }
                    peer.arm_negotiation(debounce, &self.timer_tx);
                }
                Err(e) => {
                    let err = EngineError::from_backend(&from, e);
                    self.handle_negotiation_error(&from, err, tracks).await;
                }
            }
            return;
        }

        Self::drain_candidates(&mut self.candidates, &connection, &from).await;
        match peer.coordinator_mut().remote_answer_applied() {
            Ok(true) => peer.arm_negotiation(debounce, &self.timer_tx),
            Ok(false) => {}
            Err(e) => warn!("Remote answer for {} applied out of order: {}", from, e),
        }
        debug!("Negotiation with {} is stable", from);
    }

    async fn handle_negotiation_error(
        &mut self,
        participant_id: &ParticipantId,
        err: EngineError,
        tracks: &TrackController,
    ) {
        if err.is_structural() {
            warn!("{}; recreating the peer", err);
            self.recreate_peer(participant_id, tracks).await;
        } else {
            error!("Negotiation with {} failed: {}", participant_id, err);
        }
    }

    // ---- ICE ----------------------------------------------------------

    pub async fn on_remote_candidate(
        &mut self,
        from: ParticipantId,
        candidate: IceCandidate,
        tracks: &TrackController,
    ) {
        if !self.ensure_peer(&from, tracks).await {
            return;
        }
        let Some(peer) = self.peers.get(&from) else {
            return;
        };

        let connection = Arc::clone(peer.connection());
        if !connection.has_remote_description().await {
            debug!("Buffering ICE candidate from {}", from);
            self.candidates.enqueue(&from, candidate);
            return;
        }
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate from {}: {:#}", from, e);
        }
    }

    /// Apply everything buffered for the participant, oldest first.
    async fn drain_candidates(
        candidates: &mut IceCandidateBuffer,
        connection: &Arc<dyn MediaConnection>,
        participant_id: &ParticipantId,
    ) {
        let buffered = candidates.drain(participant_id);
        if buffered.is_empty() {
            return;
        }

        debug!(
            "Applying {} buffered candidates for {}",
            buffered.len(),
            participant_id
        );
        for candidate in buffered {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!(
                    "Failed to add buffered ICE candidate for {}: {:#}",
                    participant_id, e
                );
            }
        }
    }

    pub async fn on_local_candidate(&self, handle: &PeerHandle, candidate: IceCandidate) {
        if !self.is_live(handle) {
            return;
        }
        self.signaling
            .send_ice(handle.participant_id.clone(), candidate)
            .await;
    }

    // ---- connectivity -------------------------------------------------

    pub async fn on_connection_state(&mut self, handle: &PeerHandle, state: ConnectionState) {
        let debounce = self.config.negotiation_debounce;
        let restart_timeout = self.config.ice_restart_timeout;
        let Some(peer) = live_peer(&mut self.peers, handle) else {
            return;
        };
        if !peer.set_state(state) {
            return;
        }
        info!("Connection {} is {}", handle, state);

        let mut give_up = false;
        match state {
            ConnectionState::Connected => {
                peer.set_ice_restart_attempted(false);
                peer.cancel_restart_deadline();
            }
            ConnectionState::Failed if !peer.ice_restart_attempted() => {
                info!("ICE failed for {}, attempting a restart", handle);
                peer.set_ice_restart_attempted(true);
                peer.coordinator_mut().request_ice_restart();
                peer.arm_negotiation(debounce, &self.timer_tx);
                peer.arm_restart_deadline(restart_timeout, &self.timer_tx);
            }
            ConnectionState::Failed => give_up = true,
            _ => {}
        }

        self.notify(EngineNotification::PeerStateChanged {
            participant_id: handle.participant_id.clone(),
            state,
        });

        if give_up {
            warn!("ICE failed again for {} after a restart", handle);
            self.teardown_peer(&handle.participant_id, TeardownReason::ConnectivityFailure)
                .await;
        }
    }

    pub async fn on_restart_expired(&mut self, handle: &PeerHandle) {
        let Some(peer) = live_peer(&mut self.peers, handle) else {
            return;
        };
        if peer.state() == ConnectionState::Connected {
            return;
        }
        warn!("ICE restart for {} did not reconnect in time", handle);
        self.teardown_peer(&handle.participant_id, TeardownReason::ConnectivityFailure)
            .await;
    }

    // ---- remote media -------------------------------------------------

    pub fn on_remote_track(&mut self, handle: &PeerHandle, track: RemoteTrack) {
        if !self.is_live(handle) {
            return;
        }
        let participant_id = &handle.participant_id;

        match self.media.merge(participant_id, track.clone()) {
            MergeOutcome::Duplicate => {
                debug!("Ignoring duplicate track {} from {}", track.id(), handle);
                return;
            }
            MergeOutcome::Added => {}
            MergeOutcome::Replaced(previous) => {
                debug!(
                    "Track {} from {} replaced by {}",
                    previous.id(),
                    handle,
                    track.id()
                );
                self.notify(EngineNotification::RemoteTrackRemoved {
                    participant_id: participant_id.clone(),
                    track: previous,
                });
            }
        }

        if let Some(tap) = track.tap() {
            let analyser: Arc<dyn AudioAnalyser> = tap;
            let _ = self
                .speaker_tx
                .send(SpeakerCommand::Attach(participant_id.clone(), analyser));
        }
        info!("Receiving {} track {} from {}", track.kind(), track.id(), handle);
        self.notify(EngineNotification::RemoteTrackAdded {
            participant_id: participant_id.clone(),
            track,
        });
    }

    // ---- helpers ------------------------------------------------------

    /// Signals prove the sender is in the room, so an unknown sender gets a
    /// peer on the spot.
    async fn ensure_peer(&mut self, participant_id: &ParticipantId, tracks: &TrackController) -> bool {
        if self.peers.contains_key(participant_id) {
            return true;
        }
        if *participant_id == self.local_id {
            return false;
        }
        info!("Signal from unknown participant {}, creating peer", participant_id);
        self.presence.insert(participant_id.clone());
        match self.create_peer(participant_id.clone(), tracks).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to create peer on demand: {}", e);
                false
            }
        }
    }

    fn is_live(&self, handle: &PeerHandle) -> bool {
        let live = self
            .peers
            .get(&handle.participant_id)
            .is_some_and(|peer| peer.handle() == handle);
        if !live {
            debug!("Dropping event from stale peer {}", handle);
        }
        live
    }

    fn notify(&self, notification: EngineNotification) {
        let _ = self.notifications.send(notification);
    }
}

fn live_peer<'a>(
    peers: &'a mut HashMap<ParticipantId, Peer>,
    handle: &PeerHandle,
) -> Option<&'a mut Peer> {
    match peers.get_mut(&handle.participant_id) {
        Some(peer) if peer.handle() == handle => Some(peer),
        _ => {
            debug!("Dropping event from stale peer {}", handle);
            None
        }
    }
}
