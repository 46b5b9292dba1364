use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};

use crate::error::{Result, VivaError};

use super::INPUT_SAMPLE_RATE;

const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Average interleaved frames down to one channel.
#[must_use]
pub fn mix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels.max(1));
    if ch == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Converts microphone audio at the device's rate and layout to 16kHz mono.
pub struct InputResampler {
    inner: Option<Fft<f32>>,
    channels: u16,
    pending: Vec<f32>,
}

impl InputResampler {
    pub fn new(source_rate: u32, channels: u16) -> Result<Self> {
        if source_rate == 0 || channels == 0 {
            return Err(VivaError::Resample(format!(
                "unusable input format: {source_rate} Hz, {channels} channels"
            )));
        }

        let inner = if source_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            let fft = Fft::new(
                source_rate as usize,
                INPUT_SAMPLE_RATE as usize,
                RESAMPLER_CHUNK_FRAMES,
                2,
                1,
                FixedSync::Input,
            )
            .map_err(|e| VivaError::Resample(format!("failed to create resampler: {e}")))?;
            Some(fft)
        };

        Ok(Self {
            inner,
            channels,
            pending: Vec::new(),
        })
    }

    /// Whether samples pass through without rate conversion.
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved device samples, returning whatever 16kHz mono output
    /// is ready. Input that does not fill a resampler block is kept for the
    /// next call.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let mono = mix_to_mono(interleaved, self.channels);

        let Some(resampler) = self.inner.as_mut() else {
            return Ok(mono);
        };

        self.pending.extend_from_slice(&mono);

        let mut output = Vec::new();
        let frames_needed = resampler.input_frames_next();

        while self.pending.len() >= frames_needed {
            let block = vec![self.pending.drain(..frames_needed).collect::<Vec<f32>>()];
            let input = SequentialSliceOfVecs::new(&block, 1, frames_needed)
                .map_err(|e| VivaError::Resample(format!("buffer error: {e}")))?;
            let result = resampler
                .process(&input, 0, None)
                .map_err(|e| VivaError::Resample(format!("resample error: {e}")))?;
            output.extend((0..result.frames()).map(|frame| result.read_sample(0, frame).unwrap_or(0.0)));
        }

        Ok(output)
    }
}
