use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::audio::OUTPUT_SAMPLE_RATE;
use crate::audio::device::{AudioDevices, InputFormat, InputStream, OutputStream};
use crate::audio::playback::{PlaybackHandle, PlaybackRenderer, PlaybackSink};
use crate::audio::scheduler::PlaybackScheduler;
use crate::config::AudioConfig;
use crate::error::{Result, VivaError};

use super::protocol::{ClientMessage, ServerMessage};
use super::transport::{Connector, Transport};

type Log = Arc<Mutex<Vec<&'static str>>>;

struct FakeSpeaker {
    handle: PlaybackHandle,
    renderer: PlaybackRenderer,
}

/// A 16kHz mono microphone fed by the test and a speaker whose clock only
/// moves on [`FakeDevices::advance`].
#[derive(Clone)]
pub struct FakeDevices {
    log: Log,
    mic: Arc<Mutex<Option<Sender<Vec<f32>>>>>,
    speaker: Arc<Mutex<Option<FakeSpeaker>>>,
    deny_microphone: bool,
    break_speaker: bool,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            mic: Arc::new(Mutex::new(None)),
            speaker: Arc::new(Mutex::new(None)),
            deny_microphone: false,
            break_speaker: false,
        }
    }

    pub const fn deny_microphone(mut self) -> Self {
        self.deny_microphone = true;
        self
    }

    pub const fn break_speaker(mut self) -> Self {
        self.break_speaker = true;
        self
    }

    /// Releases recorded so far, in order.
    pub fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    pub fn feed(&self, samples: Vec<f32>) {
        if let Some(tx) = self.mic.lock().as_ref() {
            let _ = tx.send(samples);
        }
    }

    /// Render `secs` of output, as the device callback would.
    pub fn advance(&self, secs: f64) {
        let frames = (secs * f64::from(OUTPUT_SAMPLE_RATE)).round() as usize;
        if let Some(speaker) = self.speaker.lock().as_mut() {
            let mut buf = vec![0.0f32; frames];
            speaker.renderer.render_interleaved(&mut buf, 1);
        }
    }

    pub fn queued_segments(&self) -> usize {
        self.speaker
            .lock()
            .as_ref()
            .map_or(0, |s| s.handle.queued_segments())
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(&self, _config: &AudioConfig) -> Result<Box<dyn InputStream>> {
        if self.deny_microphone {
            return Err(VivaError::Permission("permission denied".to_string()));
        }
        let (tx, rx) = unbounded();
        *self.mic.lock() = Some(tx);
        Ok(Box::new(FakeInput {
            receiver: rx,
            mic: Arc::clone(&self.mic),
            log: Arc::clone(&self.log),
            stopped: false,
        }))
    }

    fn open_output(
        &self,
        _config: &AudioConfig,
        sink: PlaybackSink,
    ) -> Result<Box<dyn OutputStream>> {
        if self.break_speaker {
            return Err(VivaError::Audio("no output device".to_string()));
        }
        let handle = PlaybackHandle::new();
        let renderer = handle.renderer(sink, OUTPUT_SAMPLE_RATE);
        *self.speaker.lock() = Some(FakeSpeaker {
            handle: handle.clone(),
            renderer,
        });
        Ok(Box::new(FakeOutput {
            handle,
            log: Arc::clone(&self.log),
            closed: false,
        }))
    }
}

struct FakeInput {
    receiver: Receiver<Vec<f32>>,
    mic: Arc<Mutex<Option<Sender<Vec<f32>>>>>,
    log: Log,
    stopped: bool,
}

impl InputStream for FakeInput {
    fn format(&self) -> InputFormat {
        InputFormat {
            sample_rate: 16000,
            channels: 1,
        }
    }

    fn receiver(&self) -> Receiver<Vec<f32>> {
        self.receiver.clone()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.mic.lock().take();
            self.log.lock().push("input.stop");
        }
    }
}

struct FakeOutput {
    handle: PlaybackHandle,
    log: Log,
    closed: bool,
}

impl OutputStream for FakeOutput {
    fn clock_secs(&self) -> f64 {
        self.handle.clock_secs()
    }

    fn enqueue(&self, scheduler: &mut PlaybackScheduler, samples: Vec<f32>) -> f64 {
        self.handle.enqueue(scheduler, samples)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().push("output.close");
        }
    }
}

type Inbound = Result<ServerMessage>;

/// A session whose server side is driven by [`FakeConnector::push`].
pub struct FakeConnector {
    fail: bool,
    log: Log,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    connects: AtomicUsize,
    setups: AtomicUsize,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl FakeConnector {
    fn build(fail: bool, log: Log) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            fail,
            log,
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
            setups: AtomicUsize::new(0),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, Arc::new(Mutex::new(Vec::new())))
    }

    /// Every connection attempt fails during the handshake.
    pub fn failing() -> Arc<Self> {
        Self::build(true, Arc::new(Mutex::new(Vec::new())))
    }

    /// Records `session.close` into the same log as `devices`.
    pub fn sharing_log(devices: &FakeDevices) -> Arc<Self> {
        Self::build(false, Arc::clone(&devices.log))
    }

    pub fn push(&self, message: Inbound) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// The server hangs up.
    pub fn end(&self) {
        self.inbound_tx.lock().take();
    }

    /// Fresh server side for the next connection.
    pub fn reset(&self) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound_tx.lock() = Some(tx);
        *self.inbound_rx.lock() = Some(rx);
    }

    /// Messages sent after setup.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, setup: ClientMessage) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if matches!(setup, ClientMessage::Setup(_)) {
            self.setups.fetch_add(1, Ordering::SeqCst);
        }

        let result = if self.fail {
            Err(VivaError::SessionOpen("handshake rejected".to_string()))
        } else {
            match self.inbound_rx.lock().take() {
                Some(inbound) => Ok(Box::new(FakeTransport {
                    inbound,
                    sent: Arc::clone(&self.sent),
                    log: Arc::clone(&self.log),
                }) as Box<dyn Transport>),
                None => Err(VivaError::SessionOpen("server already in use".to_string())),
            }
        };
        ready(result).boxed()
    }
}

struct FakeTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    log: Log,
}

impl Transport for FakeTransport {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        self.sent.lock().push(message);
        ready(Ok(())).boxed()
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<ServerMessage>>> {
        self.inbound.recv().boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.log.lock().push("session.close");
        ready(Ok(())).boxed()
    }
}

/// Poll `condition` until it holds, yielding to the runtime in between.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
