use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Transform size; the snapshot has half as many buckets.
pub const FFT_SIZE: usize = 256;

pub const BUCKETS: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Holds the most recent `FFT_SIZE` samples of one signal.
pub struct AmplitudeAnalyzer {
    window: Mutex<Window>,
    fft: Arc<dyn Fft<f32>>,
    blackman: Vec<f32>,
}

struct Window {
    samples: Vec<f32>,
    write_pos: usize,
}

impl AmplitudeAnalyzer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let n = FFT_SIZE as f32;
        let blackman = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32 / n;
                0.16f32.mul_add(
                    (4.0 * std::f32::consts::PI * x).cos(),
                    0.5f32.mul_add(-(2.0 * std::f32::consts::PI * x).cos(), 0.42),
                )
            })
            .collect();

        Arc::new(Self {
            window: Mutex::new(Window {
                samples: vec![0.0; FFT_SIZE],
                write_pos: 0,
            }),
            fft,
            blackman,
        })
    }

    fn push(&self, samples: &[f32]) {
        // Audio callbacks must not wait on the renderer.
        let Some(mut window) = self.window.try_lock() else {
            return;
        };
        let start = samples.len().saturating_sub(FFT_SIZE);
        for &s in &samples[start..] {
            let pos = window.write_pos;
            window.samples[pos] = s;
            window.write_pos = (pos + 1) % FFT_SIZE;
        }
    }

    /// Byte magnitudes for each frequency bucket of the current window.
    ///
    /// Every call reads only the instantaneous window; no state carries over
    /// between snapshots.
    #[must_use]
    pub fn sample_amplitudes(&self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = {
            let window = self.window.lock();
            (0..FFT_SIZE)
                .map(|i| {
                    let s = window.samples[(window.write_pos + i) % FFT_SIZE];
                    Complex::new(s * self.blackman[i], 0.0)
                })
                .collect()
        };

        self.fft.process(&mut buffer);

        buffer[..BUCKETS]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / FFT_SIZE as f32;
                let db = if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    MIN_DECIBELS
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// Write side of an analyzer, handed to whoever produces the signal.
#[derive(Clone)]
pub struct AnalyzerTap(Arc<AmplitudeAnalyzer>);

impl AnalyzerTap {
    #[must_use]
    pub const fn new(analyzer: Arc<AmplitudeAnalyzer>) -> Self {
        Self(analyzer)
    }

    pub fn push(&self, samples: &[f32]) {
        self.0.push(samples);
    }
}

/// Read side for renderers. Does not keep the analyzer alive, so once the
/// session releases its signal the source reports itself detached.
#[derive(Clone, Default)]
pub struct AmplitudeSource(Weak<AmplitudeAnalyzer>);

impl AmplitudeSource {
    #[must_use]
    pub fn new(analyzer: &Arc<AmplitudeAnalyzer>) -> Self {
        Self(Arc::downgrade(analyzer))
    }

    /// A source that is never attached.
    #[must_use]
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    /// `None` once the underlying signal has been released.
    #[must_use]
    pub fn sample_amplitudes(&self) -> Option<Vec<u8>> {
        self.0.upgrade().map(|a| a.sample_amplitudes())
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.0.strong_count() > 0
    }
}
