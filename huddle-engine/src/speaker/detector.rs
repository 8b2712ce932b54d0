use huddle_core::ParticipantId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SpeakerConfig;
use crate::speaker::analyser::AudioAnalyser;

/// Root mean square of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Speaking energy in `[0, 1]`: RMS above the noise floor.
pub fn energy(samples: &[f32], noise_floor: f32) -> f32 {
    (rms(samples) - noise_floor).clamp(0.0, 1.0)
}

/// Chooses the acoustically active participant with hysteresis.
pub struct ActiveSpeakerDetector {
    config: SpeakerConfig,
    analysers: HashMap<ParticipantId, Arc<dyn AudioAnalyser>>,
    energies: HashMap<ParticipantId, f32>,
    active: Option<ParticipantId>,
    last_switch: Option<Instant>,
    pinned: Option<ParticipantId>,
}

impl ActiveSpeakerDetector {
    pub fn new(config: SpeakerConfig) -> Self {
        Self {
            config,
            analysers: HashMap::new(),
            energies: HashMap::new(),
            active: None,
            last_switch: None,
            pinned: None,
        }
    }

    pub fn attach(&mut self, participant_id: ParticipantId, analyser: Arc<dyn AudioAnalyser>) {
        analyser.set_window(self.config.window);
        self.energies.remove(&participant_id);
        self.analysers.insert(participant_id, analyser);
    }

    /// Stop analysing a participant. If they were the active speaker the slot
    /// is cleared so the next candidate is assigned without waiting out the
    /// hold time.
    pub fn detach(&mut self, participant_id: &ParticipantId) {
        self.analysers.remove(participant_id);
        self.energies.remove(participant_id);
        if self.active.as_ref() == Some(participant_id) {
            debug!("Active speaker {} lost its audio", participant_id);
            self.active = None;
        }
    }

    pub fn pin(&mut self, participant_id: Option<ParticipantId>) {
        self.pinned = participant_id;
    }

    /// The participant to foreground: the pin if set, else the computed one.
    pub fn active(&self) -> Option<&ParticipantId> {
        self.pinned.as_ref().or(self.active.as_ref())
    }

    /// The acoustically active participant, ignoring any pin.
    pub fn detected(&self) -> Option<&ParticipantId> {
        self.active.as_ref()
    }

    pub fn energies(&self) -> &HashMap<ParticipantId, f32> {
        &self.energies
    }

    pub fn is_attached(&self, participant_id: &ParticipantId) -> bool {
        self.analysers.contains_key(participant_id)
    }

    /// One sampling tick: read every analyser, then apply the switch rule.
    ///
    /// Energies are smoothed across ticks. A participant's first reading is
    /// taken as is.
    pub fn sample(&mut self, now: Instant) -> Option<&ParticipantId> {
        let noise_floor = self.config.noise_floor;
        let window = self.config.window.max(1);
        let keep = self.config.smoothing.clamp(0.0, 1.0);

        let mut smoothed = HashMap::with_capacity(self.analysers.len());
        for (id, analyser) in &self.analysers {
            let samples = analyser.time_domain_samples();
            let recent = &samples[samples.len().saturating_sub(window)..];
            let raw = energy(recent, noise_floor);
            let value = match self.energies.get(id) {
                Some(previous) => keep * previous + (1.0 - keep) * raw,
                None => raw,
            };
            smoothed.insert(id.clone(), value);
        }
        self.energies = smoothed;

        let energies: Vec<(ParticipantId, f32)> = self
            .energies
            .iter()
            .map(|(id, e)| (id.clone(), *e))
            .collect();
        self.evaluate(&energies, now)
    }

    /// Apply the switch rule to a set of energies.
    pub fn evaluate(
        &mut self,
        energies: &[(ParticipantId, f32)],
        now: Instant,
    ) -> Option<&ParticipantId> {
        let mut top: Option<(&ParticipantId, f32)> = None;
        let mut second = 0.0f32;
        for (id, e) in energies {
            match top {
                Some((_, best)) if *e <= best => second = second.max(*e),
                Some((_, best)) => {
                    second = best;
                    top = Some((id, *e));
                }
                None => top = Some((id, *e)),
            }
        }

        if let Some((candidate, loudest)) = top {
            if self.should_switch(candidate, loudest, second, now) {
                debug!(
                    "Active speaker {:?} -> {} (energy {:.3}, runner-up {:.3})",
                    self.active, candidate, loudest, second
                );
                self.active = Some(candidate.clone());
                self.last_switch = Some(now);
            }
        }

        self.active()
    }

    fn should_switch(
        &self,
        candidate: &ParticipantId,
        loudest: f32,
        second: f32,
        now: Instant,
    ) -> bool {
        if self.active.as_ref() == Some(candidate) {
            return false;
        }
        if loudest <= self.config.threshold || loudest - second < self.config.margin {
            return false;
        }
        match (&self.active, self.last_switch) {
            (None, _) | (_, None) => true,
            (Some(_), Some(at)) => now.duration_since(at) >= self.config.hold,
        }
    }
}
