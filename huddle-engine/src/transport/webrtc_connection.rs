use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use huddle_core::{
    ConnectionState, IceCandidate, IceServerConfig, MediaKind, SdpType, SessionDescription,
    SignalingState,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::media::{LocalTrack, RemoteTrack};
use crate::transport::{
    ConnectionFactory, MediaConnection, PeerHandle, TransceiverHandle, TransportEvent,
};

/// Builds webrtc-rs peer connections.
#[derive(Debug, Default, Clone)]
pub struct WebrtcFactory;

#[async_trait]
impl ConnectionFactory for WebrtcFactory {
    async fn connect(
        &self,
        peer: PeerHandle,
        ice_servers: &[IceServerConfig],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaConnection>> {
        let connection = WebrtcConnection::new(peer, ice_servers, events).await?;
        Ok(Arc::new(connection))
    }
}

const PLACEHOLDER_STREAM_ID: &str = "huddle-idle";

/// One fixed media slot. `idle` fills the sender whenever nothing is bound:
/// webrtc-rs drops a sender's encodings on `replace_track(None)` and then
/// refuses every later track.
struct Slot {
    transceiver: Arc<RTCRtpTransceiver>,
    idle: Arc<TrackLocalStaticSample>,
    bound: Option<String>,
}

pub struct WebrtcConnection {
    peer: PeerHandle,
    peer_connection: Arc<RTCPeerConnection>,
    slots: Mutex<Vec<Slot>>,
    events: mpsc::Sender<TransportEvent>,
}

impl WebrtcConnection {
    /// Open a new connection. `events` receives everything the connection
    /// reports, tagged with `peer`.
    pub async fn new(
        peer: PeerHandle,
        ice_servers: &[IceServerConfig],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        // A. Connection lifecycle
        let state_tx = events.clone();
        let state_peer = peer.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let peer = state_peer.clone();

                Box::pin(async move {
                    info!("Peer connection state for {}: {:?}", peer, s);
                    let Some(state) = map_connection_state(s) else {
                        return;
                    };
                    let _ = tx.send(TransportEvent::StateChanged(peer, state)).await;
                })
            },
        ));

        // B. Trickle ICE
        let ice_tx = events.clone();
        let ice_peer = peer.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let peer = ice_peer.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                };
                let _ = tx
                    .send(TransportEvent::CandidateGenerated(peer, candidate))
                    .await;
            })
        }));

        // C. Renegotiation trigger
        let nego_tx = events.clone();
        let nego_peer = peer.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let tx = nego_tx.clone();
            let peer = nego_peer.clone();

            Box::pin(async move {
                debug!("Negotiation needed for {}", peer);
                let _ = tx.send(TransportEvent::NegotiationNeeded(peer)).await;
            })
        }));

        // D. Incoming media
        let track_tx = events.clone();
        let track_peer = peer.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let peer = track_peer.clone();

            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    _ => return,
                };
                let remote = RemoteTrack::from_rtp(track, kind);
                debug!("Remote {} track {} from {}", kind, remote.id(), peer);
                let _ = tx.send(TransportEvent::Track(peer, remote)).await;
            })
        }));

        Ok(Self {
            peer,
            peer_connection,
            slots: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.peer_connection)
    }
}

#[async_trait]
impl MediaConnection for WebrtcConnection {
    async fn add_transceiver(&self, kind: MediaKind) -> Result<TransceiverHandle> {
        let mut slots = self.slots.lock().await;
        let index = slots.len();
        let idle = Arc::new(idle_track(kind, index));
        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                Arc::clone(&idle) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .with_context(|| format!("failed to add {kind} transceiver"))?;

        slots.push(Slot {
            transceiver,
            idle,
            bound: None,
        });
        Ok(TransceiverHandle { index, kind })
    }

    async fn transceiver_count(&self) -> usize {
        self.peer_connection.get_transceivers().await.len()
    }

    async fn replace_track(
        &self,
        transceiver: &TransceiverHandle,
        track: Option<&LocalTrack>,
    ) -> Result<()> {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .get_mut(transceiver.index)
            .ok_or_else(|| anyhow!("no transceiver at index {}", transceiver.index))?;

        let next = match track {
            Some(track) => track.rtp_track(),
            None => Arc::clone(&slot.idle) as Arc<dyn TrackLocal + Send + Sync>,
        };
        slot.transceiver
            .sender()
            .await
            .replace_track(Some(next))
            .await
            .context("failed to replace sender track")?;

        let bound = track.map(|t| t.id().to_owned());
        let presence_changed = slot.bound.is_some() != bound.is_some();
        slot.bound = bound;
        drop(slots);

        // A sender gaining or losing its track changes the msid the remote
        // sees, so it needs a fresh offer even though replace_track alone
        // does not raise negotiation-needed.
        if presence_changed {
            if let Err(e) = self
                .events
                .try_send(TransportEvent::NegotiationNeeded(self.peer.clone()))
            {
                warn!("Could not queue negotiation for {}: {}", self.peer, e);
            }
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(Some(RTCOfferOptions {
                ice_restart,
                ..Default::default()
            }))
            .await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let Some(mut desc) = self.peer_connection.local_description().await else {
            bail!("nothing to roll back for {}", self.peer);
        };
        desc.sdp_type = RTCSdpType::Rollback;
        self.peer_connection
            .set_local_description(desc)
            .await
            .context("local rollback failed")?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            ..Default::default()
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    fn signaling_state(&self) -> SignalingState {
        match self.peer_connection.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

fn idle_track(kind: MediaKind, index: usize) -> TrackLocalStaticSample {
    let mime_type = match kind {
        MediaKind::Audio => MIME_TYPE_OPUS,
        MediaKind::Video => MIME_TYPE_VP8,
    };
    TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        format!("idle-{kind}-{index}"),
        PLACEHOLDER_STREAM_ID.to_owned(),
    )
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    let mapped = match state {
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => return None,
    };
    Some(mapped)
}
