// Playback wire format
//
// The playback device takes pre-rendered stimuli as interleaved stereo frames
// of little-endian signed 32-bit integers. Floats in [-1, 1] map to
// [-(2^31 - 1), 2^31 - 1]; anything outside is clamped first.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Integer full scale, 2^31 - 1
pub const FULL_SCALE: f64 = i32::MAX as f64;

/// Bytes per interleaved stereo frame
pub const FRAME_BYTES: usize = 8;

/// Which loudspeaker channel carries the stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerChannel {
    Left,
    Right,
    #[default]
    Both,
}

impl SpeakerChannel {
    /// Encode a mono stimulus onto the selected channel(s); the other is silent
    pub fn encode(&self, samples: &[f64]) -> Vec<u8> {
        let silence = vec![0.0; samples.len()];
        match self {
            SpeakerChannel::Left => encode_stereo_i32(samples, &silence),
            SpeakerChannel::Right => encode_stereo_i32(&silence, samples),
            SpeakerChannel::Both => encode_stereo_i32(samples, samples),
        }
    }
}

fn to_i32(sample: f64) -> i32 {
    (sample.clamp(-1.0, 1.0) * FULL_SCALE).round() as i32
}

/// Interleave two channels into i32 frames; the shorter one is zero-padded
pub fn encode_stereo_i32(left: &[f64], right: &[f64]) -> Vec<u8> {
    let frames = left.len().max(right.len());
    let mut bytes = Vec::with_capacity(frames * FRAME_BYTES);
    for i in 0..frames {
        let l = left.get(i).copied().unwrap_or(0.0);
        let r = right.get(i).copied().unwrap_or(0.0);
        bytes.extend_from_slice(&to_i32(l).to_le_bytes());
        bytes.extend_from_slice(&to_i32(r).to_le_bytes());
    }
    bytes
}

/// Split an interleaved i32 payload back into (left, right) floats
pub fn decode_stereo_i32(bytes: &[u8]) -> Result<(Vec<f64>, Vec<f64>), DeviceError> {
    if bytes.len() % FRAME_BYTES != 0 {
        return Err(DeviceError::StreamFailure {
            reason: format!(
                "stimulus payload of {} bytes is not a whole number of {}-byte frames",
                bytes.len(),
                FRAME_BYTES
            ),
        });
    }
    let frames = bytes.len() / FRAME_BYTES;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in bytes.chunks_exact(FRAME_BYTES) {
        let l = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let r = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        left.push(l as f64 / FULL_SCALE);
        right.push(r as f64 / FULL_SCALE);
    }
    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_mapping() {
        let bytes = encode_stereo_i32(&[1.0, -1.0], &[0.0, 2.0]);
        assert_eq!(bytes.len(), 16);
        assert_eq!(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), i32::MAX);
        assert_eq!(i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), -i32::MAX);
        // Out-of-range input is clamped, not wrapped
        assert_eq!(i32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]), i32::MAX);
    }

    #[test]
    fn test_speaker_channel_routing() {
        let bytes = SpeakerChannel::Right.encode(&[0.5, 0.25]);
        let (left, right) = decode_stereo_i32(&bytes).unwrap();
        assert!(left.iter().all(|&s| s == 0.0));
        assert!((right[0] - 0.5).abs() < 1e-9);
        assert!((right[1] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert!(matches!(
            decode_stereo_i32(&[0u8; 12]),
            Err(DeviceError::StreamFailure { .. })
        ));
    }
}
