//! Inbound PCM decoding
//!
//! Synthesized speech arrives as base64 encoded mono 16-bit little-endian
//! PCM. It is decoded to normalized floats before scheduling.

use base64::Engine;

use crate::error::NetworkError;

/// Decode 16-bit little-endian PCM to normalized f32 samples.
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<f32>, NetworkError> {
    if bytes.len() % 2 != 0 {
        return Err(NetworkError::ProtocolViolation(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Decode a base64 PCM payload as carried in inline data parts.
pub fn decode_base64_pcm(data: &str) -> Result<Vec<f32>, NetworkError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| NetworkError::ProtocolViolation(format!("Base64 decode error: {}", e)))?;
    decode_pcm16_le(&bytes)
}

/// Encode bytes for an outbound inline data part.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
