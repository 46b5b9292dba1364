use super::INPUT_SAMPLE_RATE;

/// A fixed window of mono samples in [-1, 1] at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Frames 16kHz mono samples into back-to-back chunks of a fixed size.
///
/// Leftover samples smaller than a chunk stay buffered and are discarded
/// with the accumulator, the same way a script processor only ever fires
/// on full buffers.
pub struct ChunkAccumulator {
    buffer: Vec<f32>,
    chunk_samples: usize,
}

impl ChunkAccumulator {
    #[must_use]
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            buffer: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
        }
    }

    /// Feed samples and return any complete chunks, oldest first.
    pub fn feed(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.buffer.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            let chunk_data: Vec<f32> = self.buffer.drain(..self.chunk_samples).collect();
            chunks.push(AudioChunk::new(chunk_data, INPUT_SAMPLE_RATE));
        }

        chunks
    }

    /// Samples waiting for the next full chunk.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
