pub mod analyzer;
pub mod buffer;
pub mod codec;
pub mod device;
pub mod playback;
pub mod resample;
pub mod scheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Result, VivaError};

use self::analyzer::AnalyzerTap;
use self::buffer::ChunkAccumulator;
use self::codec::EncodedFrame;
use self::device::InputFormat;
use self::resample::InputResampler;

/// Rate of the audio sent to the live session.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Rate of the synthesized speech the live session returns.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured chunk (256ms at 16kHz).
pub const CHUNK_SAMPLES: usize = 4096;

/// RMS of the latest captured chunk, shared between the capture thread and
/// whoever displays it.
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter(Arc<AtomicU32>);

impl VolumeMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rms: f32) {
        self.0.store(rms.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Where the capture pipeline delivers its results.
pub struct CaptureSink {
    pub chunk_samples: usize,
    pub volume: VolumeMeter,
    pub tap: AnalyzerTap,
    pub outbox: mpsc::Sender<EncodedFrame>,
}

/// Runs the capture pipeline in a dedicated thread:
/// raw device blocks → 16kHz mono → fixed chunks → volume + encode → outbox.
///
/// Hand-off to the outbox never waits: if the session is not keeping up the
/// chunk is dropped. The thread exits when the raw channel disconnects
/// (microphone released) or the outbox closes (session gone).
pub fn start_capture_pipeline(
    format: InputFormat,
    raw_rx: Receiver<Vec<f32>>,
    sink: CaptureSink,
) -> Result<JoinHandle<()>> {
    let mut resampler = InputResampler::new(format.sample_rate, format.channels)?;

    tracing::debug!(
        "capture pipeline: source_rate={}, channels={}, chunk={} samples",
        format.sample_rate,
        format.channels,
        sink.chunk_samples
    );

    std::thread::Builder::new()
        .name("vivavoce-capture".to_string())
        .spawn(move || {
            let mut accumulator = ChunkAccumulator::new(sink.chunk_samples);
            let mut sent = 0u64;
            let mut dropped = 0u64;

            while let Ok(raw) = raw_rx.recv() {
                let mono = match resampler.process(&raw) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("resample error: {e}");
                        continue;
                    }
                };

                sink.tap.push(&mono);

                for chunk in accumulator.feed(&mono) {
                    sink.volume.set(codec::rms(&chunk.samples));
                    let frame = codec::encode(&chunk);

                    match sink.outbox.try_send(frame) {
                        Ok(()) => sent += 1,
                        Err(TrySendError::Full(_)) => {
                            dropped += 1;
                            tracing::debug!("outbox full, dropping captured chunk ({dropped} so far)");
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("session gone, stopping capture pipeline");
                            return;
                        }
                    }
                }
            }

            tracing::debug!("capture pipeline exiting: {sent} chunks queued, {dropped} dropped");
        })
        .map_err(|e| VivaError::Audio(format!("failed to spawn capture thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::analyzer::AmplitudeAnalyzer;
    use super::*;

    fn sink(capacity: usize) -> (CaptureSink, mpsc::Receiver<EncodedFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = CaptureSink {
            chunk_samples: CHUNK_SAMPLES,
            volume: VolumeMeter::new(),
            tap: AnalyzerTap::new(AmplitudeAnalyzer::new()),
            outbox: tx,
        };
        (sink, rx)
    }

    const MONO_16K: InputFormat = InputFormat {
        sample_rate: INPUT_SAMPLE_RATE,
        channels: 1,
    };

    #[test]
    fn frames_encode_and_measure_volume() {
        let (sink, mut rx) = sink(8);
        let volume = sink.volume.clone();
        let (raw_tx, raw_rx) = crossbeam_channel::unbounded();

        let handle =
            start_capture_pipeline(MONO_16K, raw_rx, sink).unwrap_or_else(|e| panic!("{e}"));
        raw_tx
            .send(vec![1.0; CHUNK_SAMPLES + 10])
            .unwrap_or_else(|e| panic!("{e}"));
        drop(raw_tx);
        handle.join().unwrap_or_else(|_| panic!("capture thread panicked"));

        let frame = rx.try_recv().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(frame.sample_count(), CHUNK_SAMPLES);
        assert!(rx.try_recv().is_err());
        assert!((volume.get() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn silent_chunk_has_zero_volume() {
        let (sink, _rx) = sink(8);
        let volume = sink.volume.clone();
        volume.set(0.7);
        let (raw_tx, raw_rx) = crossbeam_channel::unbounded();

        let handle =
            start_capture_pipeline(MONO_16K, raw_rx, sink).unwrap_or_else(|e| panic!("{e}"));
        raw_tx
            .send(vec![0.0; CHUNK_SAMPLES])
            .unwrap_or_else(|e| panic!("{e}"));
        drop(raw_tx);
        handle.join().unwrap_or_else(|_| panic!("capture thread panicked"));

        assert!(volume.get().abs() < f32::EPSILON);
    }

    #[test]
    fn full_outbox_drops_instead_of_blocking() {
        let (sink, mut rx) = sink(1);
        let (raw_tx, raw_rx) = crossbeam_channel::unbounded();

        let handle =
            start_capture_pipeline(MONO_16K, raw_rx, sink).unwrap_or_else(|e| panic!("{e}"));
        raw_tx
            .send(vec![0.1; CHUNK_SAMPLES * 4])
            .unwrap_or_else(|e| panic!("{e}"));
        drop(raw_tx);
        handle.join().unwrap_or_else(|_| panic!("capture thread panicked"));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn volume_meter_round_trips_bits() {
        let meter = VolumeMeter::new();
        assert!(meter.get().abs() < f32::EPSILON);
        meter.set(0.42);
        assert!((meter.get() - 0.42).abs() < f32::EPSILON);
        meter.reset();
        assert!(meter.get().abs() < f32::EPSILON);
    }
}
