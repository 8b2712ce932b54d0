use huddle_core::{ParticipantId, SignalMessage};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::context::MediaContext;
use crate::engine::{EngineCommand, EngineNotification, EngineSnapshot};
use crate::error::{EngineError, Result};

/// Cloneable front door to a running [`MeshEngine`](crate::MeshEngine).
#[derive(Clone)]
pub struct EngineHandle {
    local_id: ParticipantId,
    command_tx: mpsc::Sender<EngineCommand>,
    notifications: broadcast::Sender<EngineNotification>,
    active_speaker: watch::Receiver<Option<ParticipantId>>,
    media: MediaContext,
}

impl EngineHandle {
    pub(crate) fn new(
        local_id: ParticipantId,
        command_tx: mpsc::Sender<EngineCommand>,
        notifications: broadcast::Sender<EngineNotification>,
        active_speaker: watch::Receiver<Option<ParticipantId>>,
        media: MediaContext,
    ) -> Self {
        Self {
            local_id,
            command_tx,
            notifications,
            active_speaker,
            media,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn presence(&self, participants: Vec<ParticipantId>) -> Result<()> {
        self.send(EngineCommand::Presence(participants)).await
    }

    pub async fn signal(&self, msg: SignalMessage) -> Result<()> {
        self.send(EngineCommand::Signal(msg)).await
    }

    pub async fn set_microphone(&self, on: bool) -> Result<()> {
        self.send(EngineCommand::SetMicrophone(on)).await
    }

    pub async fn set_camera(&self, on: bool) -> Result<()> {
        self.send(EngineCommand::SetCamera(on)).await
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.send(EngineCommand::StartScreenShare).await
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.send(EngineCommand::StopScreenShare).await
    }

    pub async fn screen_share_ended(&self) -> Result<()> {
        self.send(EngineCommand::ScreenShareEnded).await
    }

    pub async fn devices_changed(&self) -> Result<()> {
        self.send(EngineCommand::DevicesChanged).await
    }

    pub async fn pin(&self, participant_id: Option<ParticipantId>) -> Result<()> {
        self.send(EngineCommand::Pin(participant_id)).await
    }

    pub async fn leave(&self) -> Result<()> {
        self.send(EngineCommand::Leave).await
    }

    /// Ask the loop for a snapshot. Answered after every earlier command.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Inspect(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn notifications(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }

    pub fn active_speaker(&self) -> watch::Receiver<Option<ParticipantId>> {
        self.active_speaker.clone()
    }

    pub fn media(&self) -> &MediaContext {
        &self.media
    }
}
