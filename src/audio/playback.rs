use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::OUTPUT_SAMPLE_RATE;
use super::analyzer::AnalyzerTap;
use super::scheduler::PlaybackScheduler;

struct Segment {
    start: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Scheduled playback measured in 24kHz frames.
///
/// The read position only moves while the device renders, so it doubles as
/// the output clock that the scheduler compares against.
#[derive(Default)]
pub struct PlaybackTimeline {
    position: f64,
    segments: VecDeque<Segment>,
}

impl PlaybackTimeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn clock_secs(&self) -> f64 {
        self.position / f64::from(OUTPUT_SAMPLE_RATE)
    }

    /// Queue samples to start at `start_secs` on the output clock.
    pub fn submit(&mut self, start_secs: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start = (start_secs.max(0.0) * f64::from(OUTPUT_SAMPLE_RATE)).round() as u64;
        let at = self.segments.partition_point(|s| s.start <= start);
        self.segments.insert(at, Segment { start, samples });
    }

    #[must_use]
    pub fn queued_segments(&self) -> usize {
        self.segments.len()
    }

    /// Fill `out` with mono samples, advancing `step` timeline frames per
    /// output frame. Returns how many segments finished during the call.
    pub fn render(&mut self, out: &mut [f32], step: f64) -> usize {
        let mut finished = 0;

        for slot in out.iter_mut() {
            let frame = self.position.floor() as u64;
            finished += self.retire_until(frame);

            *slot = match self.segments.front() {
                Some(seg) if frame >= seg.start => {
                    let idx = (frame - seg.start) as usize;
                    let frac = (self.position - self.position.floor()) as f32;
                    let a = seg.samples[idx];
                    let b = seg.samples.get(idx + 1).copied().unwrap_or(a);
                    (b - a).mul_add(frac, a)
                }
                _ => 0.0,
            };

            self.position += step;
        }

        finished + self.retire_until(self.position.floor() as u64)
    }

    fn retire_until(&mut self, frame: u64) -> usize {
        let mut retired = 0;
        while self.segments.front().is_some_and(|s| s.end() <= frame) {
            self.segments.pop_front();
            retired += 1;
        }
        retired
    }
}

/// Where rendered output goes besides the device: the output amplitude tap
/// and the "a chunk finished playing" notification.
#[derive(Clone)]
pub struct PlaybackSink {
    pub tap: AnalyzerTap,
    pub ended: mpsc::UnboundedSender<()>,
}

/// Shared handle to a timeline, used by the session to read the clock and
/// submit audio.
#[derive(Clone, Default)]
pub struct PlaybackHandle(Arc<Mutex<PlaybackTimeline>>);

impl PlaybackHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn clock_secs(&self) -> f64 {
        self.0.lock().clock_secs()
    }

    /// Reserve the next slot and queue `samples` in it. The clock is read
    /// and the segment inserted under one lock, so the device cannot render
    /// past the slot's start in between.
    pub fn enqueue(&self, scheduler: &mut PlaybackScheduler, samples: Vec<f32>) -> f64 {
        let duration = samples.len() as f64 / f64::from(OUTPUT_SAMPLE_RATE);
        let mut timeline = self.0.lock();
        let start = scheduler.schedule_chunk(duration, timeline.clock_secs());
        timeline.submit(start, samples);
        start
    }

    #[must_use]
    pub fn queued_segments(&self) -> usize {
        self.0.lock().queued_segments()
    }

    #[must_use]
    pub fn renderer(&self, sink: PlaybackSink, device_rate: u32) -> PlaybackRenderer {
        PlaybackRenderer {
            timeline: Arc::clone(&self.0),
            sink,
            step: f64::from(OUTPUT_SAMPLE_RATE) / f64::from(device_rate.max(1)),
            scratch: Vec::new(),
        }
    }
}

/// Runs inside the device callback.
pub struct PlaybackRenderer {
    timeline: Arc<Mutex<PlaybackTimeline>>,
    sink: PlaybackSink,
    step: f64,
    scratch: Vec<f32>,
}

impl PlaybackRenderer {
    /// Render into an interleaved device buffer, duplicating mono across
    /// channels.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        self.scratch.resize(frames, 0.0);

        // Never wait on the session thread from the device callback.
        let finished = match self.timeline.try_lock() {
            Some(mut timeline) => timeline.render(&mut self.scratch, self.step),
            None => {
                self.scratch.fill(0.0);
                0
            }
        };

        for (frame, &sample) in data.chunks_exact_mut(channels).zip(&self.scratch) {
            frame.fill(sample);
        }

        self.sink.tap.push(&self.scratch);
        for _ in 0..finished {
            let _ = self.sink.ended.send(());
        }
    }
}
