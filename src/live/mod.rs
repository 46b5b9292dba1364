pub mod event;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::audio::analyzer::{AmplitudeAnalyzer, AmplitudeSource, AnalyzerTap};
use crate::audio::device::{AudioDevices, InputStream, OutputStream};
use crate::audio::playback::PlaybackSink;
use crate::audio::scheduler::PlaybackScheduler;
use crate::audio::codec::EncodedFrame;
use crate::audio::{CaptureSink, OUTPUT_SAMPLE_RATE, VolumeMeter, codec, start_capture_pipeline};
use crate::config::{AudioConfig, LiveConfig};
use crate::error::{Result, VivaError};

pub use self::event::{LiveEvent, LiveStatus, SessionState};
use self::protocol::ClientMessage;
use self::transport::{Connector, run_session};

/// How long a cancelled session task gets to send its close frame.
const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(2);

struct SessionTask {
    cancel: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Everything one connection owns. Built by `connect`, consumed by teardown.
struct ActiveSession {
    input: Option<Box<dyn InputStream>>,
    capture_thread: Option<JoinHandle<()>>,
    output: Option<Box<dyn OutputStream>>,
    session: Option<SessionTask>,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    playback_ended: mpsc::UnboundedReceiver<()>,
    input_analyzer: Arc<AmplitudeAnalyzer>,
    output_analyzer: Arc<AmplitudeAnalyzer>,
}

impl ActiveSession {
    /// Release in order: microphone, capture thread, speaker, remote session.
    /// Each step is skipped if that resource was never acquired.
    fn teardown(mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
        }

        if let Some(thread) = self.capture_thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("capture thread panicked");
        }

        if let Some(mut output) = self.output.take() {
            output.close();
        }

        if let Some(session) = self.session.take() {
            let _ = session.cancel.send(true);
            let abort = session.handle.abort_handle();
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                        if tokio::time::timeout(SESSION_CLOSE_GRACE, session.handle)
                            .await
                            .is_err()
                        {
                            tracing::debug!("session task did not close in time, aborting");
                            abort.abort();
                        }
                    });
                }
                Err(_) => abort.abort(),
            }
        }

        // Pending events die with their receivers here.
        self.events.close();
        self.playback_ended.close();
    }
}

enum Signal {
    Live(LiveEvent),
    PlaybackEnded,
}

pub struct LiveSessionManager {
    audio: AudioConfig,
    live: LiveConfig,
    instruction: String,
    devices: Box<dyn AudioDevices>,
    connector: Arc<dyn Connector>,
    state: SessionState,
    status: watch::Sender<LiveStatus>,
    volume: VolumeMeter,
    scheduler: PlaybackScheduler,
    active: Option<ActiveSession>,
}

impl LiveSessionManager {
    #[must_use]
    pub fn new(
        audio: AudioConfig,
        live: LiveConfig,
        instruction: String,
        devices: Box<dyn AudioDevices>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(LiveStatus::default());
        Self {
            audio,
            live,
            instruction,
            devices,
            connector,
            state: SessionState::Idle,
            status,
            volume: VolumeMeter::new(),
            scheduler: PlaybackScheduler::new(),
            active: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> LiveStatus {
        self.status.borrow().clone()
    }

    /// Status updates for a presentation layer.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.status.subscribe()
    }

    /// RMS of the most recent captured chunk.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    #[must_use]
    pub fn input_amplitudes(&self) -> AmplitudeSource {
        self.active.as_ref().map_or_else(AmplitudeSource::detached, |a| {
            AmplitudeSource::new(&a.input_analyzer)
        })
    }

    #[must_use]
    pub fn output_amplitudes(&self) -> AmplitudeSource {
        self.active.as_ref().map_or_else(AmplitudeSource::detached, |a| {
            AmplitudeSource::new(&a.output_analyzer)
        })
    }

    /// Start capture and playback and begin opening the remote session.
    ///
    /// Returns once everything local is running; the session reports
    /// [`LiveEvent::Opened`] when it is ready. On failure everything acquired
    /// so far is released and the error is also surfaced in the status.
    pub fn connect(&mut self) -> Result<()> {
        if self.active.is_some() {
            tracing::debug!("connect called while a session is active");
            return Ok(());
        }

        self.set_state(SessionState::Connecting);
        self.scheduler.reset();
        self.status.send_modify(|s| {
            s.error = None;
            s.connected = false;
            s.speaking = false;
        });

        match self.start() {
            Ok(active) => {
                self.active = Some(active);
                tracing::info!("connecting live session");
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to start live session: {e}");
                self.set_state(SessionState::Errored);
                self.volume.reset();
                let message = e.user_message();
                self.status.send_modify(|s| {
                    s.connected = false;
                    s.speaking = false;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<ActiveSession> {
        let rt = tokio::runtime::Handle::try_current().map_err(|e| {
            VivaError::Other(format!("live session needs a tokio runtime: {e}"))
        })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::channel(self.live.outbox_capacity.max(1));

        let mut active = ActiveSession {
            input: None,
            capture_thread: None,
            output: None,
            session: None,
            events: events_rx,
            playback_ended: ended_rx,
            input_analyzer: AmplitudeAnalyzer::new(),
            output_analyzer: AmplitudeAnalyzer::new(),
        };

        if let Err(e) = self.wire(&mut active, outbox_tx, ended_tx) {
            active.teardown();
            return Err(e);
        }

        let setup = ClientMessage::setup(&self.live.model, &self.live.voice, &self.instruction);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = rt.spawn(run_session(
            Arc::clone(&self.connector),
            setup,
            outbox_rx,
            events_tx,
            cancel_rx,
        ));
        active.session = Some(SessionTask {
            cancel: cancel_tx,
            handle,
        });

        Ok(active)
    }

    fn wire(
        &self,
        active: &mut ActiveSession,
        outbox: mpsc::Sender<EncodedFrame>,
        ended: mpsc::UnboundedSender<()>,
    ) -> Result<()> {
        let input = self.devices.open_input(&self.audio)?;
        let format = input.format();
        let raw_rx = input.receiver();
        active.input = Some(input);

        active.capture_thread = Some(start_capture_pipeline(
            format,
            raw_rx,
            CaptureSink {
                chunk_samples: self.audio.chunk_samples,
                volume: self.volume.clone(),
                tap: AnalyzerTap::new(Arc::clone(&active.input_analyzer)),
                outbox,
            },
        )?);

        active.output = Some(self.devices.open_output(
            &self.audio,
            PlaybackSink {
                tap: AnalyzerTap::new(Arc::clone(&active.output_analyzer)),
                ended,
            },
        )?);

        Ok(())
    }

    /// Tear everything down. Safe to call in any state and more than once.
    pub fn disconnect(&mut self) {
        let had_session = self.active.is_some();
        if had_session {
            self.set_state(SessionState::Closing);
        }
        self.release();
        if had_session {
            self.set_state(SessionState::Closed);
            tracing::info!("live session disconnected");
        }
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            active.teardown();
        }
        self.scheduler.reset();
        self.volume.reset();
        self.status.send_modify(|s| {
            s.connected = false;
            s.speaking = false;
        });
    }

    /// Wait for the next thing to happen in the active session and apply it.
    /// Returns `false` when there is no active session.
    pub async fn step(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let signal = tokio::select! {
            event = active.events.recv() => Signal::Live(event.unwrap_or(LiveEvent::Closed)),
            Some(()) = active.playback_ended.recv() => Signal::PlaybackEnded,
        };

        match signal {
            Signal::Live(event) => self.handle_event(event),
            Signal::PlaybackEnded => self.refresh_speaking(),
        }
        true
    }

    /// Apply one session event.
    pub fn handle_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Opened => {
                if self.state != SessionState::Connecting {
                    tracing::debug!("ignoring open in state {:?}", self.state);
                    return;
                }
                self.set_state(SessionState::Open);
            }
            LiveEvent::AudioReceived(data) => self.play(&data),
            LiveEvent::Closed => {
                tracing::info!("live session closed");
                self.set_state(SessionState::Closing);
                self.release();
                self.set_state(SessionState::Closed);
            }
            LiveEvent::Errored(e) => {
                tracing::error!("live session error: {e}");
                let message = e.user_message();
                self.release();
                self.set_state(SessionState::Errored);
                self.status.send_modify(|s| s.error = Some(message));
            }
        }
    }

    /// `connected` in the published status always follows the state.
    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        let connected = state.is_connected();
        self.status
            .send_if_modified(|s| std::mem::replace(&mut s.connected, connected) != connected);
    }

    fn play(&mut self, data: &str) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(output) = self.active.as_ref().and_then(|a| a.output.as_ref()) else {
            return;
        };

        let chunk = match codec::decode(data, OUTPUT_SAMPLE_RATE) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("skipping audio frame: {e}");
                return;
            }
        };
        if chunk.is_empty() {
            return;
        }

        let duration = chunk.duration_secs();
        let start = output.enqueue(&mut self.scheduler, chunk.samples);
        tracing::debug!("scheduled {duration:.3}s of speech at {start:.3}s");

        self.status.send_if_modified(|s| !std::mem::replace(&mut s.speaking, true));
    }

    /// Re-check speaking after a chunk finishes. Another chunk may be about
    /// to be scheduled, so this can briefly report silence between chunks.
    fn refresh_speaking(&mut self) {
        let Some(output) = self.active.as_ref().and_then(|a| a.output.as_ref()) else {
            return;
        };
        if !self.scheduler.is_speaking_now(output.clock_secs()) {
            self.status.send_if_modified(|s| std::mem::replace(&mut s.speaking, false));
        }
    }
}

impl Drop for LiveSessionManager {
    fn drop(&mut self) {
        self.release();
    }
}
