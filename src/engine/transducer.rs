// SynchronizedTransducer - one play/record step at a time
//
// Each step spawns exactly two scoped workers that rendezvous once on a Gate:
// the acquisition worker arms its device and blocks on the gate; the playback
// worker sleeps the settle delay, opens the gate, then triggers the stimulus.
// Both are joined before the step returns, so device ownership never
// overlaps between steps.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::device::{Gate, Playable, Recordable, SpeakerChannel, StimulusIndex};
use crate::error::{log_device_error, CalibrationError, DeviceError, SignalError};
use crate::sound::{RecordedSound, Sound};
use crate::synthesis::BandPass;

// Relative capture-length skew tolerated without a warning
const LENGTH_SKEW_WARN: f64 = 0.01;

/// Timing and routing of each play/record step
#[derive(Debug, Clone, PartialEq)]
pub struct TransducerSettings {
    /// Gap between arming the acquisition and opening the gate
    pub settle_delay: Duration,
    /// Acquisition channel carrying the reference microphone
    pub channel: u16,
    /// Loudspeaker channel(s) the stimulus is routed to
    pub speaker: SpeakerChannel,
    /// Join budget on top of `duration + settle_delay`
    pub device_overhead: Duration,
    /// Band-pass applied to every capture before it is returned
    pub post_filter: Option<BandPass>,
}

impl Default for TransducerSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            channel: 0,
            speaker: SpeakerChannel::Both,
            device_overhead: Duration::from_secs(2),
            post_filter: None,
        }
    }
}

/// Drives one playback and one acquisition device in lockstep
pub struct SynchronizedTransducer<P: Playable, R: Recordable> {
    player: P,
    recorder: R,
    settings: TransducerSettings,
}

impl<P: Playable, R: Recordable> SynchronizedTransducer<P, R> {
    /// Pair the devices; a post filter is redesigned for the capture rate if needed
    pub fn new(player: P, recorder: R, mut settings: TransducerSettings) -> Result<Self, CalibrationError> {
        let capture_rate = recorder.sample_rate();
        SignalError::check_sample_rate(capture_rate)?;
        SignalError::check_sample_rate(player.sample_rate())?;

        if let Some(filter) = settings.post_filter.take() {
            let filter = if (filter.sample_rate() - capture_rate).abs() > f64::EPSILON {
                debug!(
                    "Redesigning post filter from {} Hz to capture rate {} Hz",
                    filter.sample_rate(),
                    capture_rate
                );
                filter.at_sample_rate(capture_rate)?
            } else {
                filter
            };
            settings.post_filter = Some(filter);
        }

        Ok(Self {
            player,
            recorder,
            settings,
        })
    }

    pub fn settings(&self) -> &TransducerSettings {
        &self.settings
    }

    pub fn playback_rate(&self) -> f64 {
        self.player.sample_rate()
    }

    pub fn capture_rate(&self) -> f64 {
        self.recorder.sample_rate()
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Worst-case wall-clock time for one step of `duration` seconds
    pub fn step_budget(&self, duration: f64) -> Duration {
        Duration::from_secs_f64(duration.max(0.0)) + self.settings.settle_delay + self.settings.device_overhead
    }

    /// Upload a stimulus to the playback device
    pub fn load(&mut self, sound: &Sound) -> Result<StimulusIndex, CalibrationError> {
        let device = self.player.sample_rate();
        if (sound.sample_rate() - device).abs() > 1e-6 {
            return Err(CalibrationError::SampleRateMismatch {
                stimulus: sound.sample_rate(),
                device,
            });
        }
        let bytes = self.settings.speaker.encode(sound.samples());
        Ok(self.player.load(&bytes)?)
    }

    /// Load `sound`, play it at `amplitude` and capture `duration` seconds
    pub fn play_and_record(
        &mut self,
        sound: &Sound,
        duration: f64,
        amplitude: f64,
    ) -> Result<RecordedSound, CalibrationError> {
        SignalError::check_duration(duration)?;
        SignalError::check_amplitude(amplitude)?;
        let index = self.load(sound)?;
        self.play_loaded_and_record(index, duration, amplitude)
    }

    /// Replay an already loaded stimulus and capture `duration` seconds
    pub fn play_loaded_and_record(
        &mut self,
        index: StimulusIndex,
        duration: f64,
        amplitude: f64,
    ) -> Result<RecordedSound, CalibrationError> {
        SignalError::check_duration(duration)?;
        SignalError::check_amplitude(amplitude)?;

        let gate = Gate::new();
        let settle = self.settings.settle_delay;
        let channel = self.settings.channel;
        let player = &mut self.player;
        let recorder = &mut self.recorder;
        let started = Instant::now();

        let (captured, played) = thread::scope(|s| {
            let gate = &gate;
            let record = s.spawn(move || recorder.record(duration, channel, gate));
            let play = s.spawn(move || {
                thread::sleep(settle);
                gate.open();
                player.play(index, amplitude, gate)
            });

            let captured = record.join().map_err(|_| DeviceError::WorkerPanicked {
                worker: "acquisition".to_string(),
            });
            let played = play.join().map_err(|_| DeviceError::WorkerPanicked {
                worker: "playback".to_string(),
            });
            (captured, played)
        });

        let elapsed = started.elapsed();
        let budget = self.step_budget(duration);
        if elapsed > budget {
            warn!(
                "Play/record step took {:?}, over the {:?} budget",
                elapsed, budget
            );
        }

        // A failed playback makes the capture meaningless
        if let Err(err) = played.and_then(|outcome| outcome) {
            log_device_error(&err, "playback");
            return Err(err.into());
        }
        let mut samples = match captured.and_then(|outcome| outcome) {
            Ok(samples) => samples,
            Err(err) => {
                log_device_error(&err, "acquisition");
                return Err(err.into());
            }
        };

        let capture_rate = self.recorder.sample_rate();
        let expected = (duration * capture_rate).round();
        let skew = (samples.len() as f64 - expected).abs() / expected.max(1.0);
        if skew > LENGTH_SKEW_WARN {
            warn!(
                "Captured {} samples, expected {} at {} Hz",
                samples.len(),
                expected,
                capture_rate
            );
        }

        if let Some(filter) = &self.settings.post_filter {
            samples = filter.apply_checked(&samples, capture_rate)?;
        }

        debug!(
            "Step done: slot {} at amplitude {:.4}, {} samples in {:?}",
            index,
            amplitude,
            samples.len(),
            elapsed
        );
        Ok(RecordedSound::new(samples, capture_rate))
    }

    pub fn disconnect(&mut self) -> Result<(), CalibrationError> {
        Ok(self.player.disconnect()?)
    }
}
