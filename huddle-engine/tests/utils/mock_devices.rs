use async_trait::async_trait;
use huddle_core::CaptureSource;
use huddle_engine::{CaptureDevices, DeviceError, LocalTrack};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Acquired(String),
    Released(String),
}

/// Capture devices that hand out numbered tracks (`camera-1`, `camera-2`,
/// ...) and record every acquire and release.
#[derive(Clone, Default)]
pub struct MockDevices {
    failures: Arc<Mutex<HashMap<CaptureSource, DeviceError>>>,
    counters: Arc<Mutex<HashMap<CaptureSource, usize>>>,
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl MockDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next acquire of the error's source fail with it.
    pub fn fail_next(&self, error: DeviceError) {
        self.failures
            .lock()
            .unwrap()
            .insert(error.source_kind(), error);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn released(&self, track_id: &str) -> bool {
        self.events()
            .contains(&DeviceEvent::Released(track_id.to_owned()))
    }

    /// Captures acquired and not released yet.
    pub fn held(&self) -> Vec<String> {
        let mut held = Vec::new();
        for event in self.events() {
            match event {
                DeviceEvent::Acquired(id) => held.push(id),
                DeviceEvent::Released(id) => held.retain(|h| *h != id),
            }
        }
        held
    }
}

#[async_trait]
impl CaptureDevices for MockDevices {
    async fn acquire(&self, source: CaptureSource) -> Result<LocalTrack, DeviceError> {
        if let Some(error) = self.failures.lock().unwrap().remove(&source) {
            tracing::debug!("[MockDevices] failing {} acquire: {}", source, error);
            return Err(error);
        }

        let n = {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters.entry(source).or_insert(0);
            *counter += 1;
            *counter
        };
        let track = LocalTrack::with_id(format!("{source}-{n}"), source);
        self.events
            .lock()
            .unwrap()
            .push(DeviceEvent::Acquired(track.id().to_owned()));
        Ok(track)
    }

    async fn release(&self, track: &LocalTrack) {
        self.events
            .lock()
            .unwrap()
            .push(DeviceEvent::Released(track.id().to_owned()));
    }
}
