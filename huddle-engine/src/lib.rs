pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod signaling;
pub mod speaker;
pub mod transport;

pub use config::{EngineConfig, SpeakerConfig};
pub use context::MediaContext;
pub use engine::{EngineCommand, EngineHandle, EngineNotification, EngineSnapshot, MeshEngine};
pub use error::{DeviceError, EngineError};
pub use ice::IceCandidateBuffer;
pub use media::{
    CaptureDevices, LocalMediaState, LocalTrack, RemoteTrack, SyntheticDevices, TrackController,
};
pub use negotiation::{NegotiationCoordinator, NegotiationState};
pub use peer::{
    MergeOutcome, Peer, PeerConnectionManager, PeerSnapshot, RemoteStream, TeardownReason,
};
pub use signaling::{ChannelSignaling, SignalingOutput};
pub use speaker::{ActiveSpeakerDetector, AudioAnalyser, PcmTap, SpeakerMonitor};
pub use transport::{
    ConnectionFactory, LoopbackConnection, LoopbackFactory, MediaConnection, PeerHandle,
    WebrtcConnection, WebrtcFactory,
};
