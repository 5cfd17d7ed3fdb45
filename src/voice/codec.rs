//! Wire codec for PCM audio frames
//!
//! Frames travel as base64-encoded signed 16-bit little-endian PCM. Engines
//! work in `f32` normalized to `[-1.0, 1.0]`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Convert a normalized sample to signed 16-bit
///
/// Out-of-range input is clamped to `[-1.0, 1.0]` first.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Convert a signed 16-bit sample to a normalized `f32`
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / 32768.0
    } else {
        f32::from(sample) / 32767.0
    }
}

/// Encode PCM16 samples as base64 little-endian bytes
#[must_use]
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Decode base64 little-endian bytes into PCM16 samples
///
/// # Errors
///
/// Returns error if the payload is not valid base64 or has an odd byte count
pub fn decode_pcm16(data: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Codec(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "odd PCM16 payload length: {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Clamp, scale, and encode a block of normalized samples
#[must_use]
pub fn encode_frame(samples: &[f32]) -> String {
    let pcm: Vec<i16> = samples.iter().copied().map(f32_to_i16).collect();
    encode_pcm16(&pcm)
}

/// Decode a wire frame into normalized samples
///
/// # Errors
///
/// Returns error if the frame is malformed
pub fn decode_frame(data: &str) -> Result<Vec<f32>> {
    Ok(decode_pcm16(data)?.into_iter().map(i16_to_f32).collect())
}

/// Root-mean-square level of a block
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Nearest-neighbor decimator from a device rate down to a wire rate
///
/// Trades fidelity for latency: no anti-alias filter, the sample at
/// `floor(k * ratio)` is kept for every output index `k`. The read position
/// is tracked in exact integer units and carries across blocks, so
/// decimation stays phase-continuous between callbacks.
#[derive(Debug, Clone)]
pub struct Decimator {
    device_rate: u64,
    target_rate: u64,
    /// Next source position, in units of `1 / target_rate` samples
    phase: u64,
}

impl Decimator {
    /// Create a decimator for `device_rate / target_rate`
    ///
    /// A device at or below the target rate passes through unchanged.
    #[must_use]
    pub fn new(device_rate: u32, target_rate: u32) -> Self {
        let target_rate = u64::from(target_rate.max(1));
        let device_rate = u64::from(device_rate).max(target_rate);
        Self {
            device_rate,
            target_rate,
            phase: 0,
        }
    }

    /// Decimation ratio
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        self.device_rate as f64 / self.target_rate as f64
    }

    /// Whether samples pass through unchanged
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.device_rate == self.target_rate
    }

    /// Decimate `input`, appending the kept samples to `out`
    #[allow(clippy::cast_possible_truncation)]
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let span = input.len() as u64 * self.target_rate;
        while self.phase < span {
            out.push(input[(self.phase / self.target_rate) as usize]);
            self.phase += self.device_rate;
        }
        self.phase -= span;
    }
}
