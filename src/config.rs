//! Configuration management for calibration runs
//!
//! This module provides JSON-based configuration for every tunable of the
//! calibration protocols: stimulus synthesis, device synchronization, level
//! metering, EQ design and the noise / pure-tone sweeps.
//!
//! Every section carries `#[serde(default)]`, so a partial file only has to
//! name the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::analysis::level::LevelMeter;
use crate::calibration::{EqDesign, GridAxes, NoiseSweep};
use crate::device::SpeakerChannel;
use crate::engine::TransducerSettings;
use crate::error::SignalError;
use crate::synthesis::{BandPass, NoiseSource, SignalSynthesizer};

/// Default location used by the CLI when no `--config` is given
pub const DEFAULT_CONFIG_PATH: &str = "calibration_config.json";

/// Complete calibration configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub synthesis: SynthesisConfig,
    pub transducer: TransducerConfig,
    pub level: LevelMeter,
    pub eq: EqConfig,
    pub noise_sweep: NoiseSweepConfig,
    pub tone_sweep: ToneSweepConfig,
}

/// Stimulus generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Playback rate for offline synthesis and the simulated rig, in Hz
    pub sample_rate: f64,
    /// Raised-cosine-squared ramp at each end, in seconds
    pub ramp_time: f64,
    pub noise_source: NoiseSource,
    /// Fixed RNG seed; None draws from OS entropy
    pub seed: Option<u64>,
    /// Apply the calibration band to every noise stimulus
    pub band_enabled: bool,
    /// Butterworth order of each band edge
    pub band_order: usize,
    pub band_low: f64,
    pub band_high: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            ramp_time: 0.01,
            noise_source: NoiseSource::Gaussian,
            seed: None,
            band_enabled: true,
            band_order: 8,
            band_low: 500.0,
            band_high: 16_000.0,
        }
    }
}

impl SynthesisConfig {
    pub fn synthesizer(&self) -> SignalSynthesizer {
        SignalSynthesizer::new(self.noise_source, self.seed)
    }

    /// Calibration band designed at `sample_rate`, or None when disabled
    pub fn band(&self, sample_rate: f64) -> Result<Option<BandPass>, SignalError> {
        if !self.band_enabled {
            return Ok(None);
        }
        BandPass::butterworth(self.band_low, self.band_high, self.band_order, sample_rate).map(Some)
    }
}

/// Band-pass applied to every capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostFilterConfig {
    pub low: f64,
    pub high: f64,
    pub order: usize,
}

/// Play/record synchronization and routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransducerConfig {
    pub settle_delay_ms: u64,
    /// Acquisition channel carrying the reference microphone
    pub channel: u16,
    pub speaker: SpeakerChannel,
    /// Join budget on top of duration and settle delay
    pub device_overhead_ms: u64,
    pub post_filter: Option<PostFilterConfig>,
}

impl Default for TransducerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            channel: 0,
            speaker: SpeakerChannel::Both,
            device_overhead_ms: 2_000,
            post_filter: None,
        }
    }
}

impl TransducerConfig {
    /// Transducer settings with the post filter designed at `capture_rate`
    pub fn settings(&self, capture_rate: f64) -> Result<TransducerSettings, SignalError> {
        let post_filter = self
            .post_filter
            .map(|p| BandPass::butterworth(p.low, p.high, p.order, capture_rate))
            .transpose()?;
        Ok(TransducerSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            channel: self.channel,
            speaker: self.speaker,
            device_overhead: Duration::from_millis(self.device_overhead_ms),
            post_filter,
        })
    }
}

/// EQ probe and filter design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    /// Estimate an EQ filter before the noise sweep
    pub enabled: bool,
    pub probe_duration: f64,
    pub probe_amplitude: f64,
    #[serde(flatten)]
    pub design: EqDesign,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_duration: 2.0,
            probe_amplitude: 0.5,
            design: EqDesign::default(),
        }
    }
}

/// Noise curve sweep and its verification targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSweepConfig {
    #[serde(flatten)]
    pub sweep: NoiseSweep,
    pub test_targets_db: Vec<f64>,
    pub test_duration: f64,
}

impl Default for NoiseSweepConfig {
    fn default() -> Self {
        Self {
            sweep: NoiseSweep::default(),
            test_targets_db: vec![70.0, 80.0, 90.0],
            test_duration: 1.0,
        }
    }
}

/// Pure-tone grid and its verification targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSweepConfig {
    #[serde(flatten)]
    pub axes: GridAxes,
    pub test_frequencies: Vec<f64>,
    pub test_targets_db: Vec<f64>,
    pub test_duration: f64,
}

impl Default for ToneSweepConfig {
    fn default() -> Self {
        Self {
            axes: GridAxes::default(),
            test_frequencies: vec![1_500.0, 6_000.0],
            test_targets_db: vec![70.0, 80.0],
            test_duration: 0.5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// Falls back to default values if the file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path,
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Self::default()
            }
        }
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        log::info!("[Config] Saved configuration to {:?}", path.as_ref());
        Ok(())
    }
}
