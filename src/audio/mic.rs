//! Microphone input: a cpal stream delivering fixed 480-sample frames.

use crate::audio::{FRAME_SAMPLES, MIC_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MicError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Unsupported configuration: {0}")]
    Config(String),
    #[error("Microphone stalled (no frames)")]
    Stalled,
}

/// Anything that yields 30 ms microphone frames, one at a time.
///
/// `Ok(None)` means the source is exhausted and the capture loop should exit;
/// errors are transient and the loop logs and keeps going.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Vec<i16>>, MicError>;
}

#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Input device index, -1 for the system default.
    pub device_index: i32,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self { device_index: -1 }
    }
}

/// Live microphone frames. The cpal callback slices the device's native
/// buffers into 480-sample mono frames and hands them over a bounded channel;
/// frames are dropped when the consumer falls behind rather than blocking the
/// audio callback.
pub struct MicFrames {
    _stream: Stream,
    rx: Receiver<Vec<i16>>,
}

impl MicFrames {
    pub fn open(config: &MicConfig) -> Result<Self, MicError> {
        let device = input_device(config.device_index)?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let supported = device
            .supported_input_configs()
            .map_err(|e| MicError::Config(e.to_string()))?
            .find(|c| {
                c.min_sample_rate().0 <= MIC_SAMPLE_RATE && c.max_sample_rate().0 >= MIC_SAMPLE_RATE
            })
            .ok_or_else(|| {
                MicError::Config(format!("device '{}' does not support 16 kHz capture", name))
            })?
            .with_sample_rate(cpal::SampleRate(MIC_SAMPLE_RATE));

        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(MIC_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded(32);
        let channels = stream_config.channels as usize;

        log::info!(
            "Microphone '{}' opened: {} channels @ {} Hz ({:?})",
            name,
            stream_config.channels,
            MIC_SAMPLE_RATE,
            supported.sample_format()
        );

        let stream = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx, channels)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, tx, channels)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx, channels)?,
            other => {
                return Err(MicError::Config(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };

        stream.play().map_err(|e| MicError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            rx,
        })
    }
}

fn build_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<i16>>,
    channels: usize,
) -> Result<Stream, MicError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Channel 0 only; the system is mono end to end.
                for frame in data.chunks(channels) {
                    if let Some(&sample) = frame.first() {
                        pending.push(i16::from_sample(sample));
                    }
                }
                while pending.len() >= FRAME_SAMPLES {
                    let frame: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
                    // Overruns drop frames silently; the consumer is expected
                    // to keep up at 30 ms cadence.
                    let _ = tx.try_send(frame);
                }
            },
            |err| log::error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| MicError::Stream(e.to_string()))
}

impl FrameSource for MicFrames {
    fn next_frame(&mut self) -> Result<Option<Vec<i16>>, MicError> {
        match self.rx.recv_timeout(Duration::from_millis(1000)) {
            Ok(frame) => Ok(Some(frame)),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => Err(MicError::Stalled),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

fn input_device(index: i32) -> Result<Device, MicError> {
    let host = cpal::default_host();
    if index < 0 {
        return host
            .default_input_device()
            .ok_or_else(|| MicError::Device("no default input device".to_string()));
    }
    host.input_devices()
        .map_err(|e| MicError::Device(e.to_string()))?
        .nth(index as usize)
        .ok_or_else(|| MicError::Device(format!("no input device at index {}", index)))
}

/// List input and output devices as `(index, name)` pairs for `--list-devices`.
pub fn list_devices() -> Result<(Vec<String>, Vec<String>), MicError> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| MicError::Device(e.to_string()))?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| MicError::Device(e.to_string()))?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    Ok((inputs, outputs))
}
