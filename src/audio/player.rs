//! Speaker playback engine.
//!
//! Two modes, both serialized by one playback mutex:
//! - [`Player::play`] decodes a WAV blob, opens a stream at the declared
//!   format and blocks until the audio has been written or the
//!   duration + 10 s deadline passes, at which point the writer is abandoned.
//! - [`Player::play_stream`] consumes raw 44.1 kHz mono PCM chunks as they
//!   arrive; a watchdog aborts the stream when no write progress is made for
//!   10 s.

use crate::audio::STREAM_SAMPLE_RATE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
use crossbeam::channel::{bounded, Sender};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// No-progress deadline for both playback modes.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Streaming buffer high-water mark: one second of 44.1 kHz mono audio.
const HIGH_WATER_SAMPLES: usize = STREAM_SAMPLE_RATE as usize;
/// Let the device drain its own buffer before releasing the playback mutex.
const DEVICE_DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Malformed WAV: {0}")]
    BadWav(String),
    #[error("Playback stalled (no progress for 10s)")]
    Stalled,
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Output device index, -1 for the system default.
    pub device_index: i32,
    /// Volume multiplier applied to int16 samples; 1.0 bypasses.
    pub gain: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device_index: -1,
            gain: 1.0,
        }
    }
}

pub struct Player {
    config: PlayerConfig,
    lock: Mutex<()>,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    /// Play a complete WAV blob, blocking until done or abandoned.
    pub fn play(&self, wav: &[u8]) -> Result<(), PlaybackError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let reader =
            hound::WavReader::new(Cursor::new(wav)).map_err(|e| PlaybackError::BadWav(e.to_string()))?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(PlaybackError::BadWav(format!(
                "expected 16-bit PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        let mut samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::BadWav(e.to_string()))?;
        apply_gain(&mut samples, self.config.gain);

        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64),
        );

        let (device, dev_channels, format) = output_device(self.config.device_index)?;
        let stream_config = cpal::StreamConfig {
            channels: dev_channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (done_tx, done_rx) = bounded::<()>(1);
        let src_channels = spec.channels as usize;
        let stream = match format {
            SampleFormat::F32 => build_blob_stream::<f32>(
                &device,
                &stream_config,
                samples,
                src_channels,
                done_tx,
            )?,
            SampleFormat::I16 => build_blob_stream::<i16>(
                &device,
                &stream_config,
                samples,
                src_channels,
                done_tx,
            )?,
            SampleFormat::U16 => build_blob_stream::<u16>(
                &device,
                &stream_config,
                samples,
                src_channels,
                done_tx,
            )?,
            other => {
                return Err(PlaybackError::Stream(format!(
                    "unsupported output format {other:?}"
                )))
            }
        };
        stream.play().map_err(|e| PlaybackError::Stream(e.to_string()))?;

        match done_rx.recv_timeout(duration + STALL_TIMEOUT) {
            Ok(()) => {
                std::thread::sleep(DEVICE_DRAIN_GRACE);
                log::debug!("Playback finished ({:.1}s)", duration.as_secs_f32());
                Ok(())
            }
            Err(_) => {
                log::warn!(
                    "Playback did not finish within {:.1}s + {}s; abandoning writer",
                    duration.as_secs_f32(),
                    STALL_TIMEOUT.as_secs()
                );
                Err(PlaybackError::Stalled)
            }
        }
    }

    /// Play a lazy sequence of raw 16-bit LE 44.1 kHz mono PCM chunks.
    pub fn play_stream<I>(&self, chunks: I) -> Result<(), PlaybackError>
    where
        I: Iterator<Item = Vec<u8>>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let (device, dev_channels, format) = output_device(self.config.device_index)?;
        let stream_config = cpal::StreamConfig {
            channels: dev_channels,
            sample_rate: cpal::SampleRate(STREAM_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let stream = match format {
            SampleFormat::F32 => build_ring_stream::<f32>(&device, &stream_config, &buffer)?,
            SampleFormat::I16 => build_ring_stream::<i16>(&device, &stream_config, &buffer)?,
            SampleFormat::U16 => build_ring_stream::<u16>(&device, &stream_config, &buffer)?,
            other => {
                return Err(PlaybackError::Stream(format!(
                    "unsupported output format {other:?}"
                )))
            }
        };
        stream.play().map_err(|e| PlaybackError::Stream(e.to_string()))?;

        let mut carry: Option<u8> = None;
        let mut last_progress = Instant::now();
        let mut total_bytes = 0usize;

        for chunk in chunks {
            total_bytes += chunk.len();
            let mut samples = bytes_to_samples(&chunk, &mut carry);
            apply_gain(&mut samples, self.config.gain);

            loop {
                {
                    let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    if buf.len() < HIGH_WATER_SAMPLES {
                        buf.extend(samples.iter().copied());
                        last_progress = Instant::now();
                        break;
                    }
                }
                if last_progress.elapsed() >= STALL_TIMEOUT {
                    log::warn!("Streaming playback stalled; aborting");
                    return Err(PlaybackError::Stalled);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        // Source drained; wait for the device to consume the tail.
        let mut prev_len = usize::MAX;
        loop {
            let len = buffer.lock().unwrap_or_else(|e| e.into_inner()).len();
            if len == 0 {
                break;
            }
            if len < prev_len {
                prev_len = len;
                last_progress = Instant::now();
            }
            if last_progress.elapsed() >= STALL_TIMEOUT {
                log::warn!("Streaming playback stalled while draining; aborting");
                return Err(PlaybackError::Stalled);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(DEVICE_DRAIN_GRACE);

        log::debug!("Streamed {} bytes to the speaker", total_bytes);
        Ok(())
    }
}

/// Multiply int16 samples by `gain`, clipped to the int16 range.
/// A gain of exactly 1.0 bypasses the multiplication.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples {
        let scaled = (*sample as f32 * gain).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Decode little-endian 16-bit PCM bytes, carrying a split byte across
/// chunk boundaries.
fn bytes_to_samples(chunk: &[u8], carry: &mut Option<u8>) -> Vec<i16> {
    let mut samples = Vec::with_capacity(chunk.len() / 2 + 1);
    let mut bytes = chunk.iter().copied();
    if let Some(low) = carry.take() {
        if let Some(high) = bytes.next() {
            samples.push(i16::from_le_bytes([low, high]));
        } else {
            *carry = Some(low);
            return samples;
        }
    }
    let mut pending: Option<u8> = None;
    for byte in bytes {
        match pending.take() {
            Some(low) => samples.push(i16::from_le_bytes([low, byte])),
            None => pending = Some(byte),
        }
    }
    *carry = pending;
    samples
}

fn output_device(index: i32) -> Result<(Device, u16, SampleFormat), PlaybackError> {
    let host = cpal::default_host();
    let device = if index < 0 {
        host.default_output_device()
            .ok_or_else(|| PlaybackError::Device("no default output device".to_string()))?
    } else {
        host.output_devices()
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .nth(index as usize)
            .ok_or_else(|| PlaybackError::Device(format!("no output device at index {}", index)))?
    };
    let default_config = device
        .default_output_config()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    let channels = default_config.channels();
    let format = default_config.sample_format();
    Ok((device, channels, format))
}

/// Stream over an owned sample buffer; signals `done` once the cursor passes
/// the end. Mono sources are replicated across device channels, stereo
/// sources are downmixed when the device is mono.
fn build_blob_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    samples: Vec<i16>,
    src_channels: usize,
    done: Sender<()>,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    let dev_channels = config.channels as usize;
    let mut pos = 0usize;
    let mut done = Some(done);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(dev_channels) {
                    if pos + src_channels <= samples.len() {
                        let src = &samples[pos..pos + src_channels];
                        write_frame(frame, src);
                        pos += src_channels;
                    } else {
                        for out in frame.iter_mut() {
                            *out = T::from_sample(0i16);
                        }
                    }
                }
                if pos + src_channels > samples.len() {
                    if let Some(tx) = done.take() {
                        let _ = tx.try_send(());
                    }
                }
            },
            |err| log::error!("Playback stream error: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::Stream(e.to_string()))
}

/// Stream fed from a shared mono ring buffer; underruns pad with silence.
fn build_ring_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    buffer: &Arc<Mutex<VecDeque<i16>>>,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    let dev_channels = config.channels as usize;
    let buffer = Arc::clone(buffer);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                for frame in data.chunks_mut(dev_channels) {
                    let sample = buf.pop_front().unwrap_or(0);
                    for out in frame.iter_mut() {
                        *out = T::from_sample(sample);
                    }
                }
            },
            |err| log::error!("Playback stream error: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::Stream(e.to_string()))
}

fn write_frame<T>(frame: &mut [T], src: &[i16])
where
    T: SizedSample + FromSample<i16>,
{
    match (frame.len(), src.len()) {
        (_, 1) => {
            for out in frame.iter_mut() {
                *out = T::from_sample(src[0]);
            }
        }
        (1, _) => {
            let mixed = (src.iter().map(|&s| s as i32).sum::<i32>() / src.len() as i32) as i16;
            frame[0] = T::from_sample(mixed);
        }
        _ => {
            for (i, out) in frame.iter_mut().enumerate() {
                *out = T::from_sample(src[i.min(src.len() - 1)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_identity() {
        let original: Vec<i16> = vec![0, 1, -1, 1000, -1000, i16::MAX, i16::MIN];
        let mut samples = original.clone();
        apply_gain(&mut samples, 1.0);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_gain_scales_and_clips() {
        let mut samples: Vec<i16> = vec![100, -100, 30_000, -30_000];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples[0], 200);
        assert_eq!(samples[1], -200);
        assert_eq!(samples[2], i16::MAX);
        assert_eq!(samples[3], i16::MIN);
    }

    #[test]
    fn test_bytes_to_samples_carries_split_byte() {
        let mut carry = None;
        // 3 bytes: one full sample (0x0201) and a dangling low byte
        let first = bytes_to_samples(&[0x01, 0x02, 0x03], &mut carry);
        assert_eq!(first, vec![0x0201]);
        assert_eq!(carry, Some(0x03));
        // next chunk completes the split sample (0x0403)
        let second = bytes_to_samples(&[0x04, 0x05, 0x06], &mut carry);
        assert_eq!(second, vec![0x0403, 0x0605]);
        assert_eq!(carry, None);
    }

    #[test]
    fn test_write_frame_mono_to_stereo() {
        let mut frame = [0i16; 2];
        write_frame(&mut frame, &[123]);
        assert_eq!(frame, [123, 123]);
    }

    #[test]
    fn test_write_frame_stereo_to_mono_downmix() {
        let mut frame = [0i16; 1];
        write_frame(&mut frame, &[100, 300]);
        assert_eq!(frame, [200]);
    }
}
