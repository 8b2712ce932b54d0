pub mod manual_peer;
pub mod mock_devices;
pub mod test_participant;

pub use manual_peer::*;
pub use mock_devices::*;
pub use mock_signaling::*;
pub use test_participant::*;
