//! # PCM Codec
//!
//! Converts between the float samples the devices work with and the 16-bit
//! little-endian PCM the backend speaks, and between raw bytes and the base64
//! text carried inside JSON envelopes.
//!
//! ## Conversions:
//! - **Outbound**: `f32` → `i16` (saturating, truncating) → LE bytes → base64
//! - **Inbound**: base64 → LE bytes → `i16` → `f32` (divide by 32768)
//!
//! The two directions are asymmetric: positive samples scale by
//! 32767 and negative ones by 32768 so both ends of [-1, 1] land exactly on the
//! i16 limits, while decoding always divides by 32768.

use crate::error::{PipelineError, PipelineResult};
use base64::{engine::general_purpose, Engine as _};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Convert float samples to 16-bit PCM.
///
/// ## Conversion:
/// Each sample is clamped to [-1.0, 1.0]; negative values are scaled by 32768,
/// non-negative values by 32767, and the result is truncated toward zero.
/// NaN maps to 0.
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert 16-bit PCM samples to floats in [-1.0, 1.0).
pub fn int16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Encode raw bytes as standard (padded) base64.
pub fn encode_binary(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decode standard base64 back into raw bytes.
pub fn decode_binary(text: &str) -> PipelineResult<Vec<u8>> {
    Ok(general_purpose::STANDARD.decode(text)?)
}

/// Serialize samples as little-endian bytes.
pub fn int16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Parse little-endian bytes into samples.
///
/// ## Error Handling:
/// An odd byte count cannot be 16-bit PCM and is rejected as a decode error
/// rather than silently dropping the trailing byte.
pub fn le_bytes_to_int16(data: &[u8]) -> PipelineResult<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(PipelineError::Decode(format!(
            "PCM payload has odd length {} (expected 16-bit samples)",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Full outbound path for one microphone block: float → PCM16 LE → base64.
pub fn encode_pcm_frame(samples: &[f32]) -> String {
    encode_binary(&int16_to_le_bytes(&float_to_int16(samples)))
}

/// Full inbound path for one `audio` field: base64 → PCM16 LE → float.
pub fn decode_pcm_chunk(text: &str) -> PipelineResult<Vec<f32>> {
    let bytes = decode_binary(text)?;
    let samples = le_bytes_to_int16(&bytes)?;
    Ok(int16_to_float(&samples))
}
