//! Waveform value types shared by every stage of the protocol.
//!
//! A [`Sound`] is what the synthesizer produces and the playback device
//! consumes. A [`RecordedSound`] is what comes back from the acquisition
//! device; its only mutable part is the attached dB SPL reading.

use serde::{Deserialize, Serialize};

use crate::analysis::level::LevelMeter;

/// Finite, real-valued waveform at a fixed sample rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sound {
    samples: Vec<f64>,
    sample_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<Vec<f64>>,
}

impl Sound {
    pub fn new(samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
            time: None,
        }
    }

    /// Attach an explicit time axis (seconds). Ignored if its length differs
    /// from the sample count.
    pub fn with_time(mut self, time: Vec<f64>) -> Self {
        if time.len() == self.samples.len() {
            self.time = Some(time);
        } else {
            log::warn!(
                "[Sound] Ignoring time axis of {} points for {} samples",
                time.len(),
                self.samples.len()
            );
        }
        self
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds implied by the sample count.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Explicit time axis if one was attached, otherwise `n / fs`.
    pub fn time_axis(&self) -> Vec<f64> {
        match &self.time {
            Some(time) => time.clone(),
            None => (0..self.samples.len())
                .map(|n| n as f64 / self.sample_rate)
                .collect(),
        }
    }

    pub fn into_samples(self) -> Vec<f64> {
        self.samples
    }
}

/// A [`Sound`] captured by the acquisition device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSound {
    sound: Sound,
    #[serde(default)]
    db_spl: Option<f64>,
}

impl RecordedSound {
    pub fn new(samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            sound: Sound::new(samples, sample_rate),
            db_spl: None,
        }
    }

    pub fn sound(&self) -> &Sound {
        &self.sound
    }

    pub fn samples(&self) -> &[f64] {
        self.sound.samples()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sound.sample_rate()
    }

    /// Level attached by a previous [`RecordedSound::measure`], if any.
    pub fn db_spl(&self) -> Option<f64> {
        self.db_spl
    }

    /// Compute the level with `meter` once and keep it.
    ///
    /// Later calls return the stored value regardless of the meter passed,
    /// so a recording is only ever measured one way.
    pub fn measure(&mut self, meter: &LevelMeter) -> f64 {
        if let Some(db) = self.db_spl {
            return db;
        }
        let db = meter.db_spl(self);
        self.db_spl = Some(db);
        db
    }
}
