mod devices;
mod track;
mod track_controller;

pub use devices::{CaptureDevices, SyntheticDevices};
pub use track::{LocalTrack, RemoteTrack};
pub use track_controller::{LocalMediaState, TrackController};
