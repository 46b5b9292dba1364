use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::{Receiver, bounded};

use crate::config::AudioConfig;
use crate::error::{Result, VivaError};

use super::playback::{PlaybackHandle, PlaybackSink};
use super::scheduler::PlaybackScheduler;

/// Layout of the raw blocks an input stream delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An acquired microphone.
pub trait InputStream {
    fn format(&self) -> InputFormat;

    /// Interleaved f32 blocks in arrival order. The channel disconnects once
    /// the stream is stopped.
    fn receiver(&self) -> Receiver<Vec<f32>>;

    /// Release the microphone. Calling it again does nothing.
    fn stop(&mut self);
}

/// An opened speaker rendering a [`PlaybackHandle`] timeline.
pub trait OutputStream {
    /// Seconds of audio the device has rendered so far.
    fn clock_secs(&self) -> f64;

    /// Queue samples in the next free slot of `scheduler`, measured against
    /// this output's clock. Returns the slot's start.
    fn enqueue(&self, scheduler: &mut PlaybackScheduler, samples: Vec<f32>) -> f64;

    /// Close the output. Calling it again does nothing.
    fn close(&mut self);
}

/// `cpal::Stream` is not `Send` on every platform, so opened streams stay on
/// the thread that opened them.
pub trait AudioDevices {
    /// Acquire the microphone. Fails with [`VivaError::Permission`] when no
    /// input can be opened.
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn InputStream>>;

    fn open_output(&self, config: &AudioConfig, sink: PlaybackSink)
    -> Result<Box<dyn OutputStream>>;
}

fn device_name(device: &Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Names of the input devices the host reports.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| VivaError::Audio(format!("failed to enumerate input devices: {e}")))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

/// Names of the output devices the host reports.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| VivaError::Audio(format!("failed to enumerate output devices: {e}")))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_name(&d))
}

#[must_use]
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| device_name(&d))
}

/// Audio devices from the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl CpalDevices {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioDevices for CpalDevices {
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn InputStream>> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| {
                    VivaError::Permission(format!("failed to enumerate input devices: {e}"))
                })?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| VivaError::Permission(format!("input device not found: {name}")))?
        } else {
            host.default_input_device().ok_or_else(|| {
                VivaError::Permission("no default input device available".to_string())
            })?
        };

        let supported = device.default_input_config().map_err(|e| {
            VivaError::Permission(format!("failed to get default input config: {e}"))
        })?;

        let format = InputFormat {
            sample_rate: supported.sample_rate(),
            channels: supported.channels(),
        };

        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // Bounded channel; try_send keeps the audio callback from blocking.
        let (tx, rx) = bounded::<Vec<f32>>(64);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let _ = tx.try_send(data.to_vec());
                },
                |err: cpal::StreamError| tracing::error!("input stream error: {err}"),
                None,
            )
            .map_err(|e| VivaError::Permission(format!("failed to open microphone: {e}")))?;

        stream
            .play()
            .map_err(|e| VivaError::Permission(format!("failed to start microphone: {e}")))?;

        tracing::info!(
            "microphone open: {} Hz, {} channel(s)",
            format.sample_rate,
            format.channels
        );

        Ok(Box::new(CpalInput {
            stream: Some(stream),
            receiver: rx,
            format,
        }))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        sink: PlaybackSink,
    ) -> Result<Box<dyn OutputStream>> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| VivaError::Audio(format!("failed to enumerate output devices: {e}")))?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| VivaError::Audio(format!("output device not found: {name}")))?
        } else {
            host.default_output_device().ok_or_else(|| {
                VivaError::Audio("no default output device available".to_string())
            })?
        };

        let supported = device
            .default_output_config()
            .map_err(|e| VivaError::Audio(format!("failed to get default output config: {e}")))?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let handle = PlaybackHandle::new();
        let mut renderer = handle.renderer(sink, sample_rate);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    renderer.render_interleaved(data, usize::from(channels));
                },
                |err: cpal::StreamError| tracing::error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| VivaError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| VivaError::Audio(format!("failed to start output stream: {e}")))?;

        tracing::info!("speaker open: {sample_rate} Hz, {channels} channel(s)");

        Ok(Box::new(CpalOutput {
            stream: Some(stream),
            handle,
        }))
    }
}

struct CpalInput {
    stream: Option<Stream>,
    receiver: Receiver<Vec<f32>>,
    format: InputFormat,
}

impl InputStream for CpalInput {
    fn format(&self) -> InputFormat {
        self.format
    }

    fn receiver(&self) -> Receiver<Vec<f32>> {
        self.receiver.clone()
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("failed to pause microphone: {e}");
            }
            // Dropping the stream drops the callback and its sender.
            drop(stream);
            tracing::debug!("microphone released");
        }
    }
}

struct CpalOutput {
    stream: Option<Stream>,
    handle: PlaybackHandle,
}

impl OutputStream for CpalOutput {
    fn clock_secs(&self) -> f64 {
        self.handle.clock_secs()
    }

    fn enqueue(&self, scheduler: &mut PlaybackScheduler, samples: Vec<f32>) -> f64 {
        self.handle.enqueue(scheduler, samples)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("failed to pause output: {e}");
            }
            drop(stream);
            tracing::debug!("speaker closed");
        }
    }
}
