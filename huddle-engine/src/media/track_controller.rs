use huddle_core::{CaptureSource, ParticipantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DeviceError;
use crate::media::{CaptureDevices, LocalTrack};
use crate::peer::Peer;
use crate::speaker::{AudioAnalyser, SpeakerCommand};

/// The local captures and what the user asked for.
///
/// `camera_on` is the user's intent. While a screen share is running the
/// camera is not captured, and the flag decides whether it comes back when
/// the share stops.
#[derive(Debug, Default)]
pub struct LocalMediaState {
    microphone: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
    mic_on: bool,
    camera_on: bool,
    screen_sharing: bool,
}

impl LocalMediaState {
    pub fn mic_on(&self) -> bool {
        self.mic_on
    }

    pub fn camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn microphone(&self) -> Option<&LocalTrack> {
        self.microphone.as_ref()
    }

    pub fn camera(&self) -> Option<&LocalTrack> {
        self.camera.as_ref()
    }

    pub fn screen(&self) -> Option<&LocalTrack> {
        self.screen.as_ref()
    }

    /// Track every peer's audio sender should carry.
    pub fn outgoing_audio(&self) -> Option<&LocalTrack> {
        if self.mic_on {
            self.microphone.as_ref()
        } else {
            None
        }
    }

    /// Track every peer's video sender should carry. The screen wins over
    /// the camera.
    pub fn outgoing_video(&self) -> Option<&LocalTrack> {
        if self.screen_sharing {
            self.screen.as_ref()
        } else if self.camera_on {
            self.camera.as_ref()
        } else {
            None
        }
    }
}

/// Owns capture devices and mode switches.
///
/// Every change ends in [`TrackController::apply_local_tracks`], which only
/// swaps the track bound to a peer's existing senders. Renegotiation then
/// follows from the connection's own negotiation-needed signal.
pub struct TrackController {
    local_id: ParticipantId,
    devices: Arc<dyn CaptureDevices>,
    state: LocalMediaState,
    release_timeout: Duration,
    speaker_tx: mpsc::UnboundedSender<SpeakerCommand>,
    analysed: Option<String>,
}

impl TrackController {
    pub fn new(
        local_id: ParticipantId,
        devices: Arc<dyn CaptureDevices>,
        release_timeout: Duration,
        speaker_tx: mpsc::UnboundedSender<SpeakerCommand>,
    ) -> Self {
        Self {
            local_id,
            devices,
            state: LocalMediaState::default(),
            release_timeout,
            speaker_tx,
            analysed: None,
        }
    }

    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    /// Bind the current outgoing tracks (or nothing) to the peer's two
    /// senders.
    pub async fn apply_local_tracks(&self, peer: &Peer) -> anyhow::Result<()> {
        let connection = peer.connection();
        connection
            .replace_track(peer.audio(), self.state.outgoing_audio())
            .await?;
        connection
            .replace_track(peer.video(), self.state.outgoing_video())
            .await?;
        Ok(())
    }

    async fn apply_all(&self, peers: &[&Peer]) {
        for peer in peers {
            if let Err(e) = self.apply_local_tracks(peer).await {
                warn!("Failed to apply local tracks to {}: {:#}", peer.handle(), e);
            }
        }
    }

    /// Muting keeps the microphone captured and only unbinds it.
    pub async fn set_microphone(&mut self, on: bool, peers: &[&Peer]) -> Result<(), DeviceError> {
        if on && self.state.microphone.is_none() {
            match self.devices.acquire(CaptureSource::Microphone).await {
                Ok(track) => self.state.microphone = Some(track),
                Err(e) => {
                    self.state.mic_on = false;
                    return Err(e);
                }
            }
        }

        info!("Microphone {}", if on { "unmuted" } else { "muted" });
        self.state.mic_on = on;
        self.apply_all(peers).await;
        self.sync_local_analyser();
        Ok(())
    }

    /// Turning the camera off releases the capture.
    pub async fn set_camera(&mut self, on: bool, peers: &[&Peer]) -> Result<(), DeviceError> {
        if self.state.screen_sharing {
            info!(
                "Camera will be {} when the screen share stops",
                if on { "on" } else { "off" }
            );
            self.state.camera_on = on;
            return Ok(());
        }

        if !on {
            self.state.camera_on = false;
            self.apply_all(peers).await;
            if let Some(camera) = self.state.camera.take() {
                self.release(camera).await;
            }
            return Ok(());
        }

        if self.state.camera.is_none() {
            match self.devices.acquire(CaptureSource::Camera).await {
                Ok(track) => self.state.camera = Some(track),
                Err(e) => {
                    self.state.camera_on = false;
                    return Err(e);
                }
            }
        }
        self.state.camera_on = true;
        self.apply_all(peers).await;
        Ok(())
    }

    /// The display is bound before the camera is let go, so the video
    /// sender is never left empty.
    pub async fn start_screen_share(&mut self, peers: &[&Peer]) -> Result<(), DeviceError> {
        if self.state.screen_sharing {
            return Ok(());
        }

        let screen = self.devices.acquire(CaptureSource::Screen).await?;
        info!("Screen share {} started", screen.id());
        self.state.screen = Some(screen);
        self.state.screen_sharing = true;
        self.apply_all(peers).await;

        if let Some(camera) = self.state.camera.take() {
            self.release(camera).await;
        }
        Ok(())
    }

    /// Also runs when the platform ends the share on its own.
    pub async fn stop_screen_share(&mut self, peers: &[&Peer]) -> Result<(), DeviceError> {
        if !self.state.screen_sharing {
            return Ok(());
        }

        self.state.screen_sharing = false;
        self.apply_all(peers).await;
        if let Some(screen) = self.state.screen.take() {
            info!("Screen share {} stopped", screen.id());
            self.release(screen).await;
        }

        if !self.state.camera_on {
            return Ok(());
        }
        match self.devices.acquire(CaptureSource::Camera).await {
            Ok(camera) => {
                self.state.camera = Some(camera);
                self.apply_all(peers).await;
                Ok(())
            }
            Err(e) => {
                self.state.camera_on = false;
                Err(e)
            }
        }
    }

    /// Reopen every held camera/microphone capture after a device change.
    /// Each old capture is released before its replacement is acquired.
    pub async fn reacquire(&mut self, peers: &[&Peer]) -> Vec<DeviceError> {
        let mut failures = Vec::new();

        if let Some(old) = self.state.microphone.take() {
            self.release(old).await;
            match self.devices.acquire(CaptureSource::Microphone).await {
                Ok(track) => self.state.microphone = Some(track),
                Err(e) => {
                    self.state.mic_on = false;
                    failures.push(e);
                }
            }
        }

        if let Some(old) = self.state.camera.take() {
            self.release(old).await;
            match self.devices.acquire(CaptureSource::Camera).await {
                Ok(track) => self.state.camera = Some(track),
                Err(e) => {
                    self.state.camera_on = false;
                    failures.push(e);
                }
            }
        }

        self.apply_all(peers).await;
        self.sync_local_analyser();
        failures
    }

    /// Release every capture. Used when leaving the room.
    pub async fn release_all(&mut self) {
        self.state.mic_on = false;
        self.state.camera_on = false;
        self.state.screen_sharing = false;
        self.sync_local_analyser();

        let held = [
            self.state.microphone.take(),
            self.state.camera.take(),
            self.state.screen.take(),
        ];
        for track in held.into_iter().flatten() {
            self.release(track).await;
        }
    }

    async fn release(&self, track: LocalTrack) {
        track.stop();
        let released =
            tokio::time::timeout(self.release_timeout, self.devices.release(&track)).await;
        match released {
            Ok(()) => debug!("Released {} capture {}", track.source(), track.id()),
            Err(_) => warn!(
                "Timed out releasing {} capture {} after {:?}",
                track.source(),
                track.id(),
                self.release_timeout
            ),
        }
    }

    fn sync_local_analyser(&mut self) {
        let bound = self.state.outgoing_audio();
        let bound_id = bound.map(|track| track.id().to_owned());
        if bound_id == self.analysed {
            return;
        }

        let command = match bound {
            Some(track) => {
                let analyser: Arc<dyn AudioAnalyser> = track.tap();
                SpeakerCommand::Attach(self.local_id.clone(), analyser)
            }
            None => SpeakerCommand::Detach(self.local_id.clone()),
        };
        let _ = self.speaker_tx.send(command);
        self.analysed = bound_id;
    }
}
