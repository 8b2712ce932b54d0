use async_trait::async_trait;
use huddle_core::CaptureSource;
use tracing::debug;

use crate::error::DeviceError;
use crate::media::track::LocalTrack;

/// Access to the local capture hardware.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open a capture. At most one capture per source is held at a time.
    async fn acquire(&self, source: CaptureSource) -> Result<LocalTrack, DeviceError>;

    /// Release a capture previously returned by `acquire`.
    async fn release(&self, track: &LocalTrack);
}

/// Fabricates tracks without touching hardware, for bots and headless rooms.
#[derive(Debug, Default, Clone)]
pub struct SyntheticDevices;

#[async_trait]
impl CaptureDevices for SyntheticDevices {
    async fn acquire(&self, source: CaptureSource) -> Result<LocalTrack, DeviceError> {
        let track = LocalTrack::new(source);
        debug!("Synthetic {} capture {} opened", source, track.id());
        Ok(track)
    }

    async fn release(&self, track: &LocalTrack) {
        debug!("Synthetic capture {} released", track.id());
    }
}
