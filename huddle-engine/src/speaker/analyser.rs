use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of raw time-domain samples for one participant's audio.
pub trait AudioAnalyser: Send + Sync {
    /// The most recent window of samples in `[-1.0, 1.0]`.
    fn time_domain_samples(&self) -> Vec<f32>;

    /// Keep at most `samples` recent samples from now on.
    fn set_window(&self, _samples: usize) {}
}

/// Bounded window of recent PCM samples, fed by whoever decodes or captures
/// the audio and read by the speaker detector.
pub struct PcmTap {
    window: AtomicUsize,
    samples: Mutex<VecDeque<f32>>,
}

impl PcmTap {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window: AtomicUsize::new(window),
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn window(&self) -> usize {
        self.window.load(Ordering::Relaxed)
    }

    pub fn push(&self, pcm: &[f32]) {
        let window = self.window();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let skip = pcm.len().saturating_sub(window);
        for sample in &pcm[skip..] {
            while samples.len() >= window {
                samples.pop_front();
            }
            samples.push_back(*sample);
        }
    }

    /// Change the window, dropping the oldest samples if it shrinks.
    pub fn resize(&self, window: usize) {
        let window = window.max(1);
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        self.window.store(window, Ordering::Relaxed);
        while samples.len() > window {
            samples.pop_front();
        }
    }

    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl AudioAnalyser for PcmTap {
    fn time_domain_samples(&self) -> Vec<f32> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    fn set_window(&self, samples: usize) {
        self.resize(samples);
    }
}
