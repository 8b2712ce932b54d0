use huddle_core::{CaptureSource, MediaKind};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::speaker::PcmTap;

const LOCAL_STREAM_ID: &str = "huddle-local";
const DEFAULT_TAP_WINDOW: usize = 1024;

/// A local capture bound (or bindable) to a sender.
///
/// Clones share the same underlying capture.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    source: CaptureSource,
    rtp: Arc<TrackLocalStaticSample>,
    tap: Arc<PcmTap>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(source: CaptureSource) -> Self {
        Self::with_id(format!("{}-{}", source, Uuid::new_v4()), source)
    }

    pub fn with_id(id: impl Into<String>, source: CaptureSource) -> Self {
        let id = id.into();
        let mime_type = match source.kind() {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));

        Self {
            id,
            source,
            rtp,
            tap: Arc::new(PcmTap::new(DEFAULT_TAP_WINDOW)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.source.kind()
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    /// Sample sink the capture pipeline writes encoded media into.
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    pub(crate) fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtp) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Level tap for the raw captured audio.
    pub fn tap(&self) -> Arc<PcmTap> {
        Arc::clone(&self.tap)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tap.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// A track received from a remote participant.
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: MediaKind,
    stream_id: String,
    tap: Option<Arc<PcmTap>>,
    remote: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind, stream_id: impl Into<String>) -> Self {
        let tap = match kind {
            MediaKind::Audio => Some(Arc::new(PcmTap::new(DEFAULT_TAP_WINDOW))),
            MediaKind::Video => None,
        };
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            tap,
            remote: None,
        }
    }

    pub(crate) fn from_rtp(track: Arc<TrackRemote>, kind: MediaKind) -> Self {
        let mut remote = Self::new(track.id(), kind, track.stream_id());
        remote.remote = Some(track);
        remote
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Decoded-PCM tap for audio tracks. The host's decoder feeds it so the
    /// speaker detector can measure this participant.
    pub fn tap(&self) -> Option<Arc<PcmTap>> {
        self.tap.clone()
    }

    /// The underlying RTP track when received over a real connection.
    pub fn rtp_track(&self) -> Option<Arc<TrackRemote>> {
        self.remote.clone()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}
