// Progress reporting for calibration protocols
//
// Every meaningful step emits a ProgressEvent. Observers subscribe through a
// ProgressSink; a sink with no observer is a no-op, so protocol behaviour
// never depends on whether anyone is listening.

use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Protocol stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    /// Wideband probe for EQ estimation
    EqProbe,
    /// Noise amplitude sweep for the calibration curve
    NoiseCurve,
    /// Noise replay at target levels
    NoiseTest,
    /// Frequency x amplitude tone sweep
    ToneGrid,
    /// Tone replay at target levels
    ToneTest,
}

impl SweepStage {
    /// Get human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            SweepStage::EqProbe => "EQ PROBE",
            SweepStage::NoiseCurve => "NOISE CURVE",
            SweepStage::NoiseTest => "NOISE TEST",
            SweepStage::ToneGrid => "TONE GRID",
            SweepStage::ToneTest => "TONE TEST",
        }
    }
}

/// Tagged progress payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        stage: SweepStage,
        total: usize,
    },
    EqFilterEstimated {
        taps: usize,
        #[serde(with = "super::nan_as_null")]
        probe_db_spl: f64,
    },
    SweepPointMeasured {
        stage: SweepStage,
        index: usize,
        total: usize,
        frequency: Option<f64>,
        amplitude: f64,
        #[serde(with = "super::nan_as_null")]
        db_spl: f64,
    },
    /// A grid point with no usable amplitude; recorded as missing
    GridPointSkipped {
        frequency: f64,
        #[serde(with = "super::nan_as_null")]
        amplitude: f64,
    },
    CurveFitted {
        slope: f64,
        intercept: f64,
        #[serde(with = "super::nan_as_null")]
        r_squared: f64,
    },
    TestPointMeasured {
        stage: SweepStage,
        frequency: Option<f64>,
        target_db: f64,
        measured_db: Option<f64>,
    },
    StageFinished {
        stage: SweepStage,
        measured: usize,
    },
}

type Callback = dyn Fn(&ProgressEvent) + Send + Sync;

/// Optional observer of protocol progress
#[derive(Clone, Default)]
pub struct ProgressSink {
    callback: Option<Arc<Callback>>,
}

impl ProgressSink {
    /// Sink that drops every event
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Fan events out to every receiver of a broadcast channel
    ///
    /// Sends with no live receiver are ignored.
    pub fn broadcast(tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self::from_fn(move |event| {
            let _ = tx.send(event.clone());
        })
    }

    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    pub fn emit(&self, event: ProgressEvent) {
        debug!("progress: {:?}", event);
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("active", &self.is_active())
            .finish()
    }
}
