// Soundcard backend (default cpal devices)
//
// Streams are opened per play/record call and dropped before the call
// returns, so neither handle holds a live stream between sweep points.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info};

use super::wire::decode_stereo_i32;
use super::{Gate, Playable, Recordable, StimulusIndex};
use crate::error::DeviceError;

// Slack on top of the stimulus length before a stream is declared stuck
const STREAM_GRACE: Duration = Duration::from_secs(2);

fn open_failed(what: &str, e: impl std::fmt::Debug) -> DeviceError {
    DeviceError::ConnectionFailed {
        details: format!("{}: {:?}", what, e),
    }
}

pub struct CpalSpeaker {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    slots: Vec<Arc<Vec<[f32; 2]>>>,
}

impl CpalSpeaker {
    /// Open the host's default output device
    pub fn open_default() -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::ConnectionFailed {
                details: "No default output device found".to_string(),
            })?;
        let config = device
            .default_output_config()
            .map_err(|e| open_failed("Failed to get default output config", e))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(DeviceError::WrongDevice {
                expected: "F32 output".to_string(),
                found: format!("{:?}", config.sample_format()),
            });
        }
        info!(
            "Opened output device {:?} at {} Hz",
            device.name().unwrap_or_default(),
            config.sample_rate().0
        );
        Ok(Self {
            device,
            config,
            slots: Vec::new(),
        })
    }
}

impl Playable for CpalSpeaker {
    fn sample_rate(&self) -> f64 {
        self.config.sample_rate().0 as f64
    }

    fn load(&mut self, waveform: &[u8]) -> Result<StimulusIndex, DeviceError> {
        let (left, right) = decode_stereo_i32(waveform)?;
        let frames = left
            .iter()
            .zip(right.iter())
            .map(|(l, r)| [*l as f32, *r as f32])
            .collect();
        self.slots.push(Arc::new(frames));
        Ok(self.slots.len() - 1)
    }

    fn play(
        &mut self,
        index: StimulusIndex,
        amplitude: f64,
        start: &Gate,
    ) -> Result<(), DeviceError> {
        let frames = Arc::clone(
            self.slots
                .get(index)
                .ok_or(DeviceError::StimulusNotLoaded { index })?,
        );
        let stream_config: cpal::StreamConfig = self.config.clone().into();
        let channels_count = stream_config.channels as usize;
        let gain = amplitude as f32;
        let seconds = frames.len() as f64 / self.sample_rate();

        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let mut position = 0usize;
        let err_fn = |err| error!("Output stream error: {}", err);

        let stream = self
            .device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels_count) {
                        let [l, r] = frames.get(position).copied().unwrap_or([0.0, 0.0]);
                        for (ch, out) in frame.iter_mut().enumerate() {
                            *out = match ch {
                                0 => l * gain,
                                1 => r * gain,
                                _ => 0.0,
                            };
                        }
                        position += 1;
                    }
                    if position >= frames.len() {
                        let _ = done_tx.try_send(());
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| DeviceError::StreamFailure {
                reason: format!("{:?}", e),
            })?;

        start.wait();
        stream.play().map_err(|e| DeviceError::StreamFailure {
            reason: format!("{:?}", e),
        })?;

        let budget = Duration::from_secs_f64(seconds) + STREAM_GRACE;
        done_rx
            .recv_timeout(budget)
            .map_err(|_| DeviceError::Timeout {
                stage: "playback".to_string(),
                waited_ms: budget.as_millis() as u64,
            })
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.slots.clear();
        Ok(())
    }
}

pub struct CpalMicrophone {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl CpalMicrophone {
    /// Open the host's default input device
    pub fn open_default() -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| DeviceError::ConnectionFailed {
                details: "No default input device found".to_string(),
            })?;
        let config = device
            .default_input_config()
            .map_err(|e| open_failed("Failed to get default input config", e))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(DeviceError::WrongDevice {
                expected: "F32 input".to_string(),
                found: format!("{:?}", config.sample_format()),
            });
        }
        info!(
            "Opened input device {:?} at {} Hz, {} channels",
            device.name().unwrap_or_default(),
            config.sample_rate().0,
            config.channels()
        );
        Ok(Self { device, config })
    }
}

impl Recordable for CpalMicrophone {
    fn sample_rate(&self) -> f64 {
        self.config.sample_rate().0 as f64
    }

    fn record(
        &mut self,
        duration: f64,
        channel: u16,
        start: &Gate,
    ) -> Result<Vec<f64>, DeviceError> {
        let stream_config: cpal::StreamConfig = self.config.clone().into();
        if channel >= stream_config.channels {
            return Err(DeviceError::InvalidChannel {
                channel,
                available: stream_config.channels,
            });
        }
        let channels_count = stream_config.channels as usize;
        let target = (duration * self.sample_rate()).round() as usize;

        let captured = Arc::new(Mutex::new(Vec::with_capacity(target)));
        let sink = Arc::clone(&captured);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let err_fn = |err| error!("Input stream error: {}", err);

        let stream = self
            .device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(mut buffer) = sink.lock() else {
                        return;
                    };
                    for frame in data.chunks(channels_count) {
                        if buffer.len() >= target {
                            break;
                        }
                        buffer.push(frame.get(channel as usize).copied().unwrap_or(0.0) as f64);
                    }
                    if buffer.len() >= target {
                        let _ = done_tx.try_send(());
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| DeviceError::StreamFailure {
                reason: format!("{:?}", e),
            })?;

        // Armed; capture starts when the playback side opens the gate
        start.wait();
        stream.play().map_err(|e| DeviceError::StreamFailure {
            reason: format!("{:?}", e),
        })?;

        let budget = Duration::from_secs_f64(duration) + STREAM_GRACE;
        done_rx.recv_timeout(budget).map_err(|_| DeviceError::Timeout {
            stage: "capture".to_string(),
            waited_ms: budget.as_millis() as u64,
        })?;
        drop(stream);

        let samples = captured
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        Ok(samples)
    }
}
