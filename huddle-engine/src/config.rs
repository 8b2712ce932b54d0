use huddle_core::IceServerConfig;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";

/// Engine configuration. Durations are read from JSON as milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ice_servers: Vec<IceServerConfig>,
    #[serde(with = "millis")]
    pub negotiation_debounce: Duration,
    #[serde(with = "millis")]
    pub ice_restart_timeout: Duration,
    #[serde(with = "millis")]
    pub camera_release_timeout: Duration,
    pub max_buffered_candidates: usize,
    pub speaker: SpeakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_ADDR)],
            negotiation_debounce: Duration::from_millis(100),
            ice_restart_timeout: Duration::from_secs(10),
            camera_release_timeout: Duration::from_millis(1500),
            max_buffered_candidates: 256,
            speaker: SpeakerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Tuning of the active speaker rule. The defaults were picked empirically.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    pub noise_floor: f32,
    pub threshold: f32,
    pub margin: f32,
    #[serde(with = "millis")]
    pub hold: Duration,
    #[serde(with = "millis")]
    pub sample_interval: Duration,
    /// Number of most recent samples each energy measurement covers.
    /// Analysers are resized to it when attached.
    pub window: usize,
    /// Share of the previous energy kept on every tick. `0.0` turns
    /// smoothing off.
    pub smoothing: f32,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            noise_floor: 0.02,
            threshold: 0.06,
            margin: 0.03,
            hold: Duration::from_millis(1200),
            sample_interval: Duration::from_millis(16),
            window: 1024,
            smoothing: 0.6,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
