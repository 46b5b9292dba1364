use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::analyzer::AmplitudeSource;
use crate::live::LiveStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const SPEAKING: Self = Self(0x8b, 0x5c, 0xf6);
    pub const CONNECTED: Self = Self(0x3b, 0x82, 0xf6);
    pub const ACCENT: Self = Self(0x60, 0xa5, 0xfa);
    pub const CENTERLINE: Self = Self(0xe2, 0xe8, 0xf0);

    #[must_use]
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (f32::from(b) - f32::from(a)).mul_add(t, f32::from(a)).round() as u8;
        Self(mix(self.0, to.0), mix(self.1, to.1), mix(self.2, to.2))
    }
}

/// Space between bars, in canvas units.
pub const BAR_GAP: f32 = 2.0;

/// Virtual drawing surface the bar geometry is computed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f32,
    pub height: f32,
}

impl Canvas {
    const CELL_WIDTH: f32 = 8.0;
    const HEIGHT: f32 = 64.0;

    /// A canvas sized for `columns` terminal cells.
    #[must_use]
    pub fn for_columns(columns: usize) -> Self {
        Self {
            width: columns.max(1) as f32 * Self::CELL_WIDTH,
            height: Self::HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub x: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Centerline {
        color: Rgb,
    },
    /// Bars with a vertical gradient from `base` at the bottom to `accent`
    /// at the top of the canvas.
    Bars {
        bars: Vec<Bar>,
        base: Rgb,
        accent: Rgb,
    },
}

/// Lay out one frame. `amplitudes` is `None` when no signal is attached.
/// Bars are only drawn for a connected session; anything else is the idle
/// centerline.
#[must_use]
pub fn layout_frame(
    amplitudes: Option<&[u8]>,
    status: &LiveStatus,
    canvas: Canvas,
) -> Frame {
    let Some(data) = amplitudes.filter(|d| status.connected && !d.is_empty()) else {
        return Frame::Centerline {
            color: Rgb::CENTERLINE,
        };
    };

    let bar_width = canvas.width / data.len() as f32 * 2.5;
    let mut bars = Vec::new();
    let mut x = 0.0;

    for &magnitude in data {
        if x >= canvas.width {
            break;
        }
        bars.push(Bar {
            x,
            width: bar_width,
            height: f32::from(magnitude) / 255.0 * canvas.height,
        });
        x += bar_width + BAR_GAP;
    }

    Frame::Bars {
        bars,
        base: if status.speaking {
            Rgb::SPEAKING
        } else {
            Rgb::CONNECTED
        },
        accent: Rgb::ACCENT,
    }
}

pub trait FrameSink {
    fn draw(&mut self, frame: &Frame, canvas: Canvas) -> io::Result<()>;

    /// Remove whatever was drawn last.
    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Draws frames on a single terminal line with truecolor block characters.
pub struct TerminalSink<W: Write> {
    out: W,
    columns: usize,
    line: String,
}

impl TerminalSink<io::Stdout> {
    #[must_use]
    pub fn stdout(columns: usize) -> Self {
        Self::new(io::stdout(), columns)
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W, columns: usize) -> Self {
        Self {
            out,
            columns: columns.max(1),
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn push_cell(&mut self, color: Rgb, ch: char) {
        use std::fmt::Write as _;
        let _ = write!(self.line, "\x1b[38;2;{};{};{}m{ch}", color.0, color.1, color.2);
    }
}

impl<W: Write> FrameSink for TerminalSink<W> {
    fn draw(&mut self, frame: &Frame, canvas: Canvas) -> io::Result<()> {
        self.line.clear();
        self.line.push('\r');

        match frame {
            Frame::Centerline { color } => {
                for _ in 0..self.columns {
                    self.push_cell(*color, '─');
                }
            }
            Frame::Bars { bars, base, accent } => {
                let cell = canvas.width / self.columns as f32;
                for col in 0..self.columns {
                    let center = (col as f32 + 0.5) * cell;
                    let height = bars
                        .iter()
                        .filter(|b| center >= b.x && center < b.x + b.width)
                        .map(|b| b.height)
                        .fold(0.0f32, f32::max);
                    let level = (height / canvas.height).clamp(0.0, 1.0);
                    let idx = (level * 8.0).round() as usize;
                    self.push_cell(base.lerp(*accent, level), LEVELS[idx]);
                }
            }
        }

        self.line.push_str("\x1b[0m");
        self.out.write_all(self.line.as_bytes())?;
        self.out.flush()
    }

    fn clear(&mut self) -> io::Result<()> {
        self.out.write_all(b"\r\x1b[2K")?;
        self.out.flush()
    }
}

/// A running render loop. Dropping it without [`RenderLoop::stop`] leaves
/// the task running until its sink fails.
pub struct RenderLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    pub fn spawn<S>(
        source: AmplitudeSource,
        status: watch::Receiver<LiveStatus>,
        canvas: Canvas,
        fps: u32,
        mut sink: S,
    ) -> Self
    where
        S: FrameSink + Send + 'static,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {
                        let current = status.borrow().clone();
                        let amplitudes = source.sample_amplitudes();
                        let frame = layout_frame(amplitudes.as_deref(), &current, canvas);
                        if let Err(e) = sink.draw(&frame, canvas) {
                            tracing::warn!("visualizer stopped: {e}");
                            return;
                        }
                    }
                }
            }

            if let Err(e) = sink.clear() {
                tracing::debug!("failed to clear visualizer: {e}");
            }
        });

        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it. No frame is drawn after this returns.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            tracing::debug!("visualizer task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use parking_lot::Mutex;

    use super::*;
    use crate::audio::analyzer::{AmplitudeAnalyzer, AnalyzerTap, BUCKETS};

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Frame>>>,
        cleared: Arc<Mutex<bool>>,
    }

    impl FrameSink for RecordingSink {
        fn draw(&mut self, frame: &Frame, _canvas: Canvas) -> io::Result<()> {
            self.frames.lock().push(frame.clone());
            Ok(())
        }

        fn clear(&mut self) -> io::Result<()> {
            *self.cleared.lock() = true;
            Ok(())
        }
    }

    fn status(connected: bool, speaking: bool) -> LiveStatus {
        LiveStatus {
            connected,
            speaking,
            error: None,
        }
    }

    #[test]
    fn no_signal_draws_centerline() {
        let frame = layout_frame(None, &status(true, false), Canvas::for_columns(48));
        assert_eq!(
            frame,
            Frame::Centerline {
                color: Rgb::CENTERLINE
            }
        );
    }

    #[test]
    fn bar_geometry() {
        let canvas = Canvas {
            width: 480.0,
            height: 100.0,
        };
        let data: Vec<u8> = (0..BUCKETS).map(|i| if i == 1 { 255 } else { 51 }).collect();

        let Frame::Bars { bars, base, accent } = layout_frame(Some(&data), &status(true, false), canvas)
        else {
            panic!("expected bars");
        };

        assert_eq!(base, Rgb::CONNECTED);
        assert_eq!(accent, Rgb::ACCENT);
        assert_relative_eq!(bars[0].width, 9.375);
        assert_relative_eq!(bars[1].x, 11.375);
        assert_relative_eq!(bars[0].height, 20.0);
        assert_relative_eq!(bars[1].height, 100.0);
        // Bars that would start past the right edge are not drawn.
        assert_eq!(bars.len(), 43);
        assert!(bars.iter().all(|b| b.x < canvas.width));
    }

    #[test]
    fn speaking_changes_base_color() {
        let frame = layout_frame(Some(&[10, 20]), &status(true, true), Canvas::for_columns(10));
        let Frame::Bars { base, .. } = frame else {
            panic!("expected bars");
        };
        assert_eq!(base, Rgb::SPEAKING);
    }

    #[test]
    fn not_connected_draws_centerline_even_with_signal() {
        let frame = layout_frame(Some(&[200; BUCKETS]), &status(false, false), Canvas::for_columns(10));
        assert_eq!(
            frame,
            Frame::Centerline {
                color: Rgb::CENTERLINE
            }
        );
    }

    #[test]
    fn lerp_endpoints() {
        assert_eq!(Rgb::SPEAKING.lerp(Rgb::ACCENT, 0.0), Rgb::SPEAKING);
        assert_eq!(Rgb::SPEAKING.lerp(Rgb::ACCENT, 1.0), Rgb::ACCENT);
        assert_eq!(Rgb(0, 0, 0).lerp(Rgb(200, 100, 50), 0.5), Rgb(100, 50, 25));
    }

    #[test]
    fn terminal_centerline_uses_centerline_color() {
        let mut sink = TerminalSink::new(Vec::new(), 4);
        let canvas = Canvas::for_columns(4);
        sink.draw(&layout_frame(None, &status(false, false), canvas), canvas)
            .unwrap_or_else(|e| panic!("{e}"));

        let out = String::from_utf8(sink.into_inner()).unwrap_or_else(|e| panic!("{e}"));
        assert!(out.starts_with('\r'));
        assert_eq!(out.matches("\x1b[38;2;226;232;240m─").count(), 4);
        assert!(out.ends_with("\x1b[0m"));
    }

    #[test]
    fn terminal_full_bar_is_full_block() {
        let mut sink = TerminalSink::new(Vec::new(), 1);
        let canvas = Canvas::for_columns(1);
        let frame = Frame::Bars {
            bars: vec![Bar {
                x: 0.0,
                width: canvas.width,
                height: canvas.height,
            }],
            base: Rgb::CONNECTED,
            accent: Rgb::ACCENT,
        };
        sink.draw(&frame, canvas).unwrap_or_else(|e| panic!("{e}"));

        let out = String::from_utf8(sink.into_inner()).unwrap_or_else(|e| panic!("{e}"));
        assert!(out.contains("\x1b[38;2;96;165;250m█"));
    }

    #[tokio::test]
    async fn render_loop_draws_until_stopped() {
        let analyzer = AmplitudeAnalyzer::new();
        AnalyzerTap::new(Arc::clone(&analyzer)).push(&[0.5; 256]);
        let (_status_tx, status_rx) = watch::channel(status(true, false));
        let sink = RecordingSink::default();

        let render = RenderLoop::spawn(
            AmplitudeSource::new(&analyzer),
            status_rx,
            Canvas::for_columns(16),
            100,
            sink.clone(),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        render.stop().await;

        let drawn = sink.frames.lock().len();
        assert!(drawn > 0);
        assert!(*sink.cleared.lock());
        assert!(
            sink.frames
                .lock()
                .iter()
                .all(|f| matches!(f, Frame::Bars { .. }))
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.frames.lock().len(), drawn);
    }

    #[tokio::test]
    async fn released_signal_falls_back_to_centerline() {
        let analyzer = AmplitudeAnalyzer::new();
        let source = AmplitudeSource::new(&analyzer);
        drop(analyzer);

        let (_status_tx, status_rx) = watch::channel(status(true, false));
        let sink = RecordingSink::default();
        let render = RenderLoop::spawn(source, status_rx, Canvas::for_columns(8), 100, sink.clone());
        tokio::time::sleep(Duration::from_millis(40)).await;
        render.stop().await;

        let frames = sink.frames.lock();
        assert!(!frames.is_empty());
        assert!(
            frames
                .iter()
                .all(|f| matches!(f, Frame::Centerline { .. }))
        );
    }

    #[tokio::test]
    async fn idle_line_until_session_opens() {
        let analyzer = AmplitudeAnalyzer::new();
        AnalyzerTap::new(Arc::clone(&analyzer)).push(&[0.5; 256]);
        let (status_tx, status_rx) = watch::channel(status(false, false));
        let sink = RecordingSink::default();

        let render = RenderLoop::spawn(
            AmplitudeSource::new(&analyzer),
            status_rx,
            Canvas::for_columns(8),
            100,
            sink.clone(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let connecting = sink.frames.lock().len();
        assert!(connecting > 0);
        assert!(
            sink.frames
                .lock()
                .iter()
                .all(|f| matches!(f, Frame::Centerline { .. }))
        );

        status_tx.send_modify(|s| s.connected = true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        render.stop().await;

        let frames = sink.frames.lock();
        assert!(frames.len() > connecting);
        assert!(matches!(frames.last(), Some(Frame::Bars { .. })));
    }
}
