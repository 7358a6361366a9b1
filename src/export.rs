//! Persistence of stimuli, recordings and calibration results
//!
//! Sounds go to 32-bit float WAV through `hound`; results and configuration
//! go to pretty-printed JSON. Missing measurements are written as `null`.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::sound::Sound;

fn float_spec(channels: u16, sample_rate: f64) -> Result<hound::WavSpec> {
    if !(sample_rate.is_finite() && sample_rate >= 1.0 && sample_rate <= u32::MAX as f64) {
        return Err(anyhow!("sample rate {} Hz cannot be stored in a WAV header", sample_rate));
    }
    Ok(hound::WavSpec {
        channels,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    })
}

/// Write a mono sound as 32-bit float WAV
pub fn write_mono<P: AsRef<Path>>(path: P, sound: &Sound) -> Result<()> {
    let path = path.as_ref();
    let spec = float_spec(1, sound.sample_rate())?;
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &sample in sound.samples() {
        writer.write_sample(sample as f32)?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalizing {}", path.display()))?;
    log::debug!("Wrote {} mono samples to {}", sound.len(), path.display());
    Ok(())
}

/// Write two channels as interleaved 32-bit float WAV
///
/// The shorter channel is padded with silence.
pub fn write_stereo<P: AsRef<Path>>(path: P, left: &[f64], right: &[f64], sample_rate: f64) -> Result<()> {
    let path = path.as_ref();
    let spec = float_spec(2, sample_rate)?;
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for i in 0..left.len().max(right.len()) {
        writer.write_sample(left.get(i).copied().unwrap_or(0.0) as f32)?;
        writer.write_sample(right.get(i).copied().unwrap_or(0.0) as f32)?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

/// Read a mono WAV back into a sound; integer formats are scaled to [-1, 1]
pub fn read_mono<P: AsRef<Path>>(path: P) -> Result<Sound> {
    let path = path.as_ref();
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(anyhow!(
            "{} must be mono (found {} channels)",
            path.display(),
            spec.channels
        ));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map(f64::from).map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f64>>>()?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f64;
            match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|sample| sample.map(|v| v as f64 / max).map_err(|err| anyhow!(err)))
                    .collect::<Result<Vec<f64>>>()?,
                24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f64 / max).map_err(|err| anyhow!(err)))
                    .collect::<Result<Vec<f64>>>()?,
                other => {
                    return Err(anyhow!(
                        "Unsupported bits per sample {} in {}",
                        other,
                        path.display()
                    ))
                }
            }
        }
    };

    Ok(Sound::new(samples, spec.sample_rate as f64))
}

/// Serialize any result as pretty JSON
pub fn save_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(value).context("serializing JSON")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}
