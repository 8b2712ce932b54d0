mod peer;
mod peer_manager;
mod remote_stream;

pub use peer::{Peer, PeerSnapshot, TeardownReason, TimerEvent};
pub use peer_manager::PeerConnectionManager;
pub use remote_stream::{MergeOutcome, RemoteStream};
