// Simulated loopback rig
//
// A speaker and a microphone joined by an in-process channel. The speaker
// turns each triggered stimulus into a pressure waveform (sensitivity,
// acoustic coloration) and hands it across; the microphone resamples it onto
// its own clock, delays it by the trigger latency, adds a noise floor and
// converts to volts with its sensitivity. Nothing is physically played, but
// the handshake runs exactly as it would against hardware.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::wire::decode_stereo_i32;
use super::{Gate, Playable, Recordable, StimulusIndex};
use crate::analysis::spectrum::convolve_same;
use crate::error::DeviceError;

/// Physical parameters of the simulated rig
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackConfig {
    /// Playback DAC rate in Hz
    pub playback_rate: f64,
    /// Acquisition ADC rate in Hz
    pub capture_rate: f64,
    /// Number of acquisition channels
    pub channels: u16,
    /// Sound pressure (Pa) produced by a full-scale sample
    pub pascals_per_unit: f64,
    /// Microphone sensitivity in V/Pa
    pub mic_factor: f64,
    /// Impulse response of the speaker/room path; empty means flat
    pub coloration: Vec<f64>,
    /// RMS of additive noise at the microphone, in Pa
    pub noise_floor_pa: f64,
    /// Delay between the gate opening and sound reaching the microphone
    pub latency: Duration,
    /// How long the microphone waits on the gate or on the speaker
    pub response_timeout: Duration,
    /// Pace play and record in wall-clock time
    pub realtime: bool,
    /// Noise seed; None draws from entropy
    pub seed: Option<u64>,
    /// Fail every play after this many have succeeded
    pub fail_after_plays: Option<usize>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            playback_rate: 48_000.0,
            capture_rate: 48_000.0,
            channels: 2,
            pascals_per_unit: 2.0,
            mic_factor: 1.0,
            coloration: Vec::new(),
            noise_floor_pa: 2e-4,
            latency: Duration::from_millis(5),
            response_timeout: Duration::from_secs(5),
            realtime: false,
            seed: None,
            fail_after_plays: None,
        }
    }
}

// What reaches the microphone for one trigger
enum Arrival {
    Pressure { samples: Vec<f64>, sample_rate: f64 },
    Silence,
}

// Tagged with the id of the gate that started the step
struct Emission {
    step: u64,
    sound: Arrival,
}

/// Build a connected speaker/microphone pair
pub fn loopback_pair(config: LoopbackConfig) -> (LoopbackSpeaker, LoopbackMicrophone) {
    let (tx, rx) = mpsc::channel();
    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let speaker = LoopbackSpeaker {
        config: config.clone(),
        slots: Vec::new(),
        plays: 0,
        connected: true,
        tx,
    };
    let microphone = LoopbackMicrophone { config, rx, rng };
    (speaker, microphone)
}

pub struct LoopbackSpeaker {
    config: LoopbackConfig,
    slots: Vec<(Vec<f64>, Vec<f64>)>,
    plays: usize,
    connected: bool,
    tx: Sender<Emission>,
}

impl LoopbackSpeaker {
    /// Number of successful plays so far
    pub fn plays(&self) -> usize {
        self.plays
    }

    pub fn loaded(&self) -> usize {
        self.slots.len()
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::ConnectionFailed {
                details: "loopback speaker is disconnected".to_string(),
            })
        }
    }

    fn pressure(&self, index: StimulusIndex, amplitude: f64) -> Result<Vec<f64>, DeviceError> {
        let (left, right) = self
            .slots
            .get(index)
            .ok_or(DeviceError::StimulusNotLoaded { index })?;

        // Both drivers radiate into the same point
        let mut drive: Vec<f64> = left
            .iter()
            .zip(right.iter())
            .map(|(l, r)| (l + r) * amplitude)
            .collect();
        if !self.config.coloration.is_empty() {
            drive = convolve_same(&drive, &self.config.coloration);
        }
        Ok(drive
            .into_iter()
            .map(|s| s * self.config.pascals_per_unit)
            .collect())
    }
}

impl Playable for LoopbackSpeaker {
    fn sample_rate(&self) -> f64 {
        self.config.playback_rate
    }

    fn load(&mut self, waveform: &[u8]) -> Result<StimulusIndex, DeviceError> {
        self.ensure_connected()?;
        let channels = decode_stereo_i32(waveform)?;
        self.slots.push(channels);
        let index = self.slots.len() - 1;
        debug!("Loopback speaker loaded slot {} ({} bytes)", index, waveform.len());
        Ok(index)
    }

    fn play(
        &mut self,
        index: StimulusIndex,
        amplitude: f64,
        start: &Gate,
    ) -> Result<(), DeviceError> {
        start.wait();

        let outcome = self.ensure_connected().and_then(|_| {
            if let Some(limit) = self.config.fail_after_plays {
                if self.plays >= limit {
                    return Err(DeviceError::ConnectionFailed {
                        details: format!("loopback speaker dropped after {} plays", limit),
                    });
                }
            }
            self.pressure(index, amplitude)
        });

        match outcome {
            Ok(samples) => {
                let seconds = samples.len() as f64 / self.config.playback_rate;
                let emission = Emission {
                    step: start.id(),
                    sound: Arrival::Pressure {
                        samples,
                        sample_rate: self.config.playback_rate,
                    },
                };
                if self.tx.send(emission).is_err() {
                    warn!("Loopback microphone is gone; stimulus {} went nowhere", index);
                }
                self.plays += 1;
                if self.config.realtime {
                    thread::sleep(Duration::from_secs_f64(seconds));
                }
                Ok(())
            }
            Err(err) => {
                // The microphone still hears the room
                let _ = self.tx.send(Emission {
                    step: start.id(),
                    sound: Arrival::Silence,
                });
                Err(err)
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = false;
        self.slots.clear();
        Ok(())
    }
}

pub struct LoopbackMicrophone {
    config: LoopbackConfig,
    rx: Receiver<Emission>,
    rng: StdRng,
}

impl LoopbackMicrophone {
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    // Next emission of step `step`; leftovers from aborted steps are dropped
    fn receive(&self, step: u64, deadline: Instant) -> Result<Arrival, DeviceError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(emission) if emission.step == step => return Ok(emission.sound),
                Ok(emission) => {
                    debug!("Dropping stale emission from step {}", emission.step);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DeviceError::Timeout {
                        stage: "waiting for stimulus".to_string(),
                        waited_ms: self.config.response_timeout.as_millis() as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::ConnectionFailed {
                        details: "loopback speaker was dropped".to_string(),
                    })
                }
            }
        }
    }

    /// Pressure at capture time `t` seconds after the gate opened
    fn sample_at(&self, pressure: &[f64], source_rate: f64, t: f64) -> f64 {
        let t = t - self.config.latency.as_secs_f64();
        if t < 0.0 {
            return 0.0;
        }
        let position = t * source_rate;
        let i = position.floor() as usize;
        let frac = position - i as f64;
        match (pressure.get(i), pressure.get(i + 1)) {
            (Some(a), Some(b)) => a + (b - a) * frac,
            (Some(a), None) => a * (1.0 - frac),
            _ => 0.0,
        }
    }
}

impl Recordable for LoopbackMicrophone {
    fn sample_rate(&self) -> f64 {
        self.config.capture_rate
    }

    fn record(
        &mut self,
        duration: f64,
        channel: u16,
        start: &Gate,
    ) -> Result<Vec<f64>, DeviceError> {
        if channel >= self.config.channels {
            return Err(DeviceError::InvalidChannel {
                channel,
                available: self.config.channels,
            });
        }

        let timeout = self.config.response_timeout;
        if !start.wait_timeout(timeout) {
            return Err(DeviceError::Timeout {
                stage: "waiting for start gate".to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        let armed_at = Instant::now();
        let sound = self.receive(start.id(), armed_at + timeout + Duration::from_secs_f64(duration))?;

        let total = (duration * self.config.capture_rate).round() as usize;
        let mut capture = Vec::with_capacity(total);
        for n in 0..total {
            let t = n as f64 / self.config.capture_rate;
            let pressure = match &sound {
                Arrival::Pressure {
                    samples,
                    sample_rate,
                } => self.sample_at(samples, *sample_rate, t),
                Arrival::Silence => 0.0,
            };
            let noisy = pressure + self.config.noise_floor_pa * self.gaussian();
            capture.push(noisy * self.config.mic_factor);
        }

        if self.config.realtime {
            let target = armed_at + Duration::from_secs_f64(duration);
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
        }
        Ok(capture)
    }
}
