mod analyser;
mod detector;
mod monitor;

pub use analyser::{AudioAnalyser, PcmTap};
pub use detector::{ActiveSpeakerDetector, energy, rms};
pub use monitor::{SpeakerCommand, SpeakerMonitor};
