use huddle_core::ParticipantId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::SpeakerConfig;
use crate::speaker::analyser::AudioAnalyser;
use crate::speaker::detector::ActiveSpeakerDetector;

pub enum SpeakerCommand {
    Attach(ParticipantId, Arc<dyn AudioAnalyser>),
    Detach(ParticipantId),
    Pin(Option<ParticipantId>),
}

/// Runs the detector on its own sampling clock, independent of the
/// negotiation loop, and publishes the active speaker on a watch channel.
pub struct SpeakerMonitor {
    detector: ActiveSpeakerDetector,
    command_rx: mpsc::UnboundedReceiver<SpeakerCommand>,
    active_tx: watch::Sender<Option<ParticipantId>>,
    sample_interval: std::time::Duration,
}

impl SpeakerMonitor {
    pub fn new(
        config: SpeakerConfig,
    ) -> (
        Self,
        mpsc::UnboundedSender<SpeakerCommand>,
        watch::Receiver<Option<ParticipantId>>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (active_tx, active_rx) = watch::channel(None);
        let sample_interval = config.sample_interval;

        let monitor = Self {
            detector: ActiveSpeakerDetector::new(config),
            command_rx,
            active_tx,
            sample_interval,
        };
        (monitor, command_tx, active_rx)
    }

    pub async fn run(mut self) {
        info!("Speaker monitor started");

        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c),
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    self.detector.sample(Instant::now());
                }
            }

            self.publish();
        }

        info!("Speaker monitor finished");
    }

    fn handle_command(&mut self, cmd: SpeakerCommand) {
        match cmd {
            SpeakerCommand::Attach(participant_id, analyser) => {
                debug!("Analysing audio of {}", participant_id);
                self.detector.attach(participant_id, analyser);
            }
            SpeakerCommand::Detach(participant_id) => {
                debug!("Stopped analysing audio of {}", participant_id);
                self.detector.detach(&participant_id);
            }
            SpeakerCommand::Pin(participant_id) => {
                info!("Speaker pin set to {:?}", participant_id);
                self.detector.pin(participant_id);
            }
        }
    }

    fn publish(&self) {
        let next = self.detector.active().cloned();
        self.active_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
