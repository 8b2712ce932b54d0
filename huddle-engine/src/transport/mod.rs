mod connection;
mod loopback;
mod transport_event;
mod webrtc_connection;

pub use connection::{ConnectionFactory, MediaConnection, PeerHandle, TransceiverHandle};
pub use loopback::{LoopbackConnection, LoopbackFactory};
pub use transport_event::TransportEvent;
pub use webrtc_connection::{WebrtcConnection, WebrtcFactory};
