//! Measurement apparatus abstractions.
//!
//! The calibration engine talks to exactly two devices: something that plays
//! pre-rendered stimuli ([`Playable`]) and something that captures the
//! microphone signal ([`Recordable`]). It never inspects the concrete type
//! behind either trait. Both sides block on a shared [`Gate`] so the capture
//! window brackets the stimulus.

pub mod gate;
pub mod loopback;
pub mod wire;

#[cfg(feature = "hardware")]
pub mod cpal;

pub use gate::Gate;
pub use loopback::{loopback_pair, LoopbackConfig, LoopbackMicrophone, LoopbackSpeaker};
pub use wire::{decode_stereo_i32, encode_stereo_i32, SpeakerChannel, FULL_SCALE};

#[cfg(feature = "hardware")]
pub use self::cpal::{CpalMicrophone, CpalSpeaker};

use crate::error::DeviceError;

/// Slot identifier returned by [`Playable::load`]
pub type StimulusIndex = usize;

/// Trait implemented by stimulus playback devices.
///
/// Stimuli are uploaded once as interleaved i32 stereo bytes (see [`wire`])
/// and then triggered by index with a per-trigger amplitude multiplier.
pub trait Playable: Send {
    /// Playback sample rate in Hz
    fn sample_rate(&self) -> f64;

    fn load(&mut self, waveform: &[u8]) -> Result<StimulusIndex, DeviceError>;

    /// Wait for `start` to open, then play slot `index` scaled by `amplitude`
    fn play(&mut self, index: StimulusIndex, amplitude: f64, start: &Gate)
        -> Result<(), DeviceError>;

    fn disconnect(&mut self) -> Result<(), DeviceError>;
}

/// Trait implemented by acquisition devices.
pub trait Recordable: Send {
    /// Acquisition sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Arm on `channel`, wait for `start` to open, then capture `duration` seconds
    ///
    /// Channel validation happens before waiting, so a mis-wired rig fails
    /// without holding up the playback side.
    fn record(&mut self, duration: f64, channel: u16, start: &Gate)
        -> Result<Vec<f64>, DeviceError>;
}
