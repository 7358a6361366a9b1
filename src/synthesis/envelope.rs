// Ramp envelope - click-free onset and offset
//
// Raised-cosine-squared fade-in over the first `ramp_samples`, mirrored
// fade-out over the last `ramp_samples`, unity in between.

use std::f64::consts::FRAC_PI_2;

use crate::error::SignalError;

/// Number of samples each ramp spans for a ramp time in seconds
pub fn ramp_samples(ramp_time: f64, sample_rate: f64) -> usize {
    if ramp_time <= 0.0 || !ramp_time.is_finite() {
        return 0;
    }
    (ramp_time * sample_rate).round() as usize
}

/// Build the envelope for `total_samples` samples
///
/// Fails if the two ramps would overlap.
pub fn ramp_envelope(total_samples: usize, ramp_samples: usize) -> Result<Vec<f64>, SignalError> {
    if 2 * ramp_samples > total_samples {
        return Err(SignalError::RampTooLong {
            ramp_samples,
            total_samples,
        });
    }

    let mut envelope = vec![1.0; total_samples];
    if ramp_samples == 0 {
        return Ok(envelope);
    }

    let denom = (ramp_samples.max(2) - 1) as f64;
    for i in 0..ramp_samples {
        let gain = (FRAC_PI_2 * i as f64 / denom).sin().powi(2);
        envelope[i] = gain;
        envelope[total_samples - 1 - i] = gain;
    }
    Ok(envelope)
}
