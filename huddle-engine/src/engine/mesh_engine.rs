use huddle_core::{ParticipantId, SignalMessage};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::MediaContext;
use crate::engine::{EngineCommand, EngineHandle, EngineNotification, EngineSnapshot};
use crate::error::DeviceError;
use crate::media::{CaptureDevices, TrackController};
use crate::peer::{PeerConnectionManager, TimerEvent};
use crate::signaling::SignalingOutput;
use crate::speaker::{SpeakerCommand, SpeakerMonitor};
use crate::transport::{ConnectionFactory, TransportEvent};

const COMMAND_CAPACITY: usize = 100;
const TRANSPORT_CAPACITY: usize = 1024;
const NOTIFICATION_CAPACITY: usize = 256;

/// The negotiation engine for one local participant in one room.
///
/// Commands, transport events and timers are handled one at a time on the
/// task running [`MeshEngine::run`], so no peer is ever touched
/// concurrently.
pub struct MeshEngine {
    local_id: ParticipantId,
    peers: PeerConnectionManager,
    tracks: TrackController,
    speaker: Option<SpeakerMonitor>,
    speaker_tx: mpsc::UnboundedSender<SpeakerCommand>,
    command_rx: mpsc::Receiver<EngineCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    notifications: broadcast::Sender<EngineNotification>,
}

impl MeshEngine {
    pub fn new(
        local_id: ParticipantId,
        config: EngineConfig,
        factory: Arc<dyn ConnectionFactory>,
        devices: Arc<dyn CaptureDevices>,
        signaling: Arc<dyn SignalingOutput>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (speaker, speaker_tx, active_rx) = SpeakerMonitor::new(config.speaker.clone());
        let media = MediaContext::new();

        let tracks = TrackController::new(
            local_id.clone(),
            devices,
            config.camera_release_timeout,
            speaker_tx.clone(),
        );
        let peers = PeerConnectionManager::new(
            local_id.clone(),
            config,
            factory,
            signaling,
            transport_tx,
            timer_tx,
            speaker_tx.clone(),
            notifications.clone(),
            media.clone(),
        );

        let handle = EngineHandle::new(
            local_id.clone(),
            command_tx,
            notifications.clone(),
            active_rx,
            media,
        );
        let engine = Self {
            local_id,
            peers,
            tracks,
            speaker: Some(speaker),
            speaker_tx,
            command_rx,
            transport_rx,
            timer_rx,
            notifications,
        };
        (engine, handle)
    }

    pub async fn run(mut self) {
        info!("Engine for {} started", self.local_id);
        let speaker = self.speaker.take().map(|monitor| tokio::spawn(monitor.run()));

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let cmd = cmd.unwrap_or_else(|| {
                        info!("Command channel closed. Leaving the room.");
                        EngineCommand::Leave
                    });
                    if self.handle_command(cmd).await.is_break() {
                        break;
                    }
                }

                Some(evt) = self.transport_rx.recv() => {
                    self.handle_transport_event(evt).await;
                }

                Some(timer) = self.timer_rx.recv() => {
                    self.handle_timer(timer).await;
                }
            }
        }

        info!("Engine for {} finished", self.local_id);
        drop(self);
        if let Some(speaker) = speaker {
            let _ = speaker.await;
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) -> ControlFlow<()> {
        match cmd {
            EngineCommand::Presence(participants) => {
                self.peers
                    .on_presence_update(participants, &self.tracks)
                    .await;
            }

            EngineCommand::Signal(msg) => self.handle_signal(msg).await,

            EngineCommand::SetMicrophone(on) => {
                let peers = self.peers.peers();
                let result = self.tracks.set_microphone(on, &peers).await;
                self.report(result);
            }

            EngineCommand::SetCamera(on) => {
                let peers = self.peers.peers();
                let result = self.tracks.set_camera(on, &peers).await;
                self.report(result);
            }

            EngineCommand::StartScreenShare => {
                let peers = self.peers.peers();
                let result = self.tracks.start_screen_share(&peers).await;
                self.report(result);
            }

            EngineCommand::StopScreenShare | EngineCommand::ScreenShareEnded => {
                let peers = self.peers.peers();
                let result = self.tracks.stop_screen_share(&peers).await;
                self.report(result);
            }

            EngineCommand::DevicesChanged => {
                info!("Capture devices changed, reacquiring");
                let peers = self.peers.peers();
                let failures = self.tracks.reacquire(&peers).await;
                for failure in failures {
                    self.report(Err(failure));
                }
            }

            EngineCommand::Pin(participant_id) => {
                let _ = self.speaker_tx.send(SpeakerCommand::Pin(participant_id));
            }

            EngineCommand::Inspect(reply) => {
                let _ = reply.send(self.snapshot().await);
            }

            EngineCommand::Leave => {
                self.leave().await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_signal(&mut self, msg: SignalMessage) {
        if let Some(target) = msg.target() {
            if *target != self.local_id {
                debug!("Ignoring signal addressed to {}", target);
                return;
            }
        }

        match msg {
            SignalMessage::IceConfig { ice_servers } => {
                info!("Received {} ICE servers", ice_servers.len());
                self.peers.set_ice_servers(ice_servers);
            }
            SignalMessage::Presence { participants } => {
                self.peers
                    .on_presence_update(participants, &self.tracks)
                    .await;
            }
            SignalMessage::Offer { from, sdp, .. } => {
                self.peers.on_remote_offer(from, sdp, &self.tracks).await;
            }
            SignalMessage::Answer { from, sdp, .. } => {
                self.peers.on_remote_answer(from, sdp, &self.tracks).await;
            }
            SignalMessage::IceCandidate {
                from, candidate, ..
            } => {
                self.peers
                    .on_remote_candidate(from, candidate, &self.tracks)
                    .await;
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::CandidateGenerated(peer, candidate) => {
                self.peers.on_local_candidate(&peer, candidate).await;
            }
            TransportEvent::StateChanged(peer, state) => {
                self.peers.on_connection_state(&peer, state).await;
            }
            TransportEvent::NegotiationNeeded(peer) => {
                self.peers.on_negotiation_needed(&peer);
            }
            TransportEvent::Track(peer, track) => {
                self.peers.on_remote_track(&peer, track);
            }
        }
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::NegotiationDue(peer) => {
                self.peers.on_negotiation_due(&peer, &self.tracks).await;
            }
            TimerEvent::IceRestartExpired(peer) => {
                self.peers.on_restart_expired(&peer).await;
            }
        }
    }

    async fn leave(&mut self) {
        info!("{} is leaving the room", self.local_id);
        self.tracks.release_all().await;
        self.peers.shutdown().await;
    }

    async fn snapshot(&self) -> EngineSnapshot {
        let state = self.tracks.state();
        EngineSnapshot {
            peers: self.peers.snapshot().await,
            mic_on: state.mic_on(),
            camera_on: state.camera_on(),
            screen_sharing: state.screen_sharing(),
            outgoing_audio: state.outgoing_audio().map(|t| t.id().to_owned()),
            outgoing_video: state.outgoing_video().map(|t| t.id().to_owned()),
        }
    }

    fn report(&self, result: Result<(), DeviceError>) {
        if let Err(e) = result {
            warn!("Device failure: {}", e);
            let _ = self
                .notifications
                .send(EngineNotification::DeviceFailure(e));
        }
    }
}
