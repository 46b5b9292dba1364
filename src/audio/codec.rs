use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::error::{Result, VivaError};

use super::buffer::AudioChunk;

/// Little-endian i16 PCM paired with its base64 text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub pcm: Vec<u8>,
    pub data: String,
}

impl EncodedFrame {
    #[must_use]
    pub fn from_pcm(pcm: Vec<u8>) -> Self {
        let data = BASE64_STANDARD.encode(&pcm);
        Self { pcm, data }
    }

    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Convert a normalized sample to i16.
///
/// Both halves share the 32768 scale used by [`decode_pcm`] so a round trip
/// stays within one step; the positive side saturates at `i16::MAX` so +1.0
/// does not overflow. This deliberately differs from the common 0x7FFF
/// positive scale, which would not match the decode scale.
#[must_use]
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32768.0).min(32767.0) as i16
    }
}

#[must_use]
pub fn encode(chunk: &AudioChunk) -> EncodedFrame {
    let mut pcm = Vec::with_capacity(chunk.samples.len() * 2);
    for &sample in &chunk.samples {
        pcm.extend_from_slice(&float_to_i16(sample).to_le_bytes());
    }
    EncodedFrame::from_pcm(pcm)
}

/// Read i16 LE PCM as normalized floats. A trailing odd byte is ignored.
#[must_use]
pub fn decode_pcm(pcm: &[u8], sample_rate: u32) -> AudioChunk {
    let samples = pcm
        .chunks_exact(2)
        .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32768.0)
        .collect();
    AudioChunk::new(samples, sample_rate)
}

/// Decode a base64 transport payload into samples at `sample_rate`.
pub fn decode(data: &str, sample_rate: u32) -> Result<AudioChunk> {
    let pcm = BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| VivaError::Codec(format!("invalid base64 audio payload: {e}")))?;
    if pcm.len() % 2 != 0 {
        tracing::debug!("odd PCM payload length {}, dropping last byte", pcm.len());
    }
    Ok(decode_pcm(&pcm, sample_rate))
}

/// Root mean square of the samples; 0 for an empty slice.
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
