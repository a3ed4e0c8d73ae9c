//! Thin wrappers around the host sound system.

pub mod mic;
pub mod player;
pub mod wav;

/// Microphone sample rate; the VAD and the ASR service both require it.
pub const MIC_SAMPLE_RATE: u32 = 16_000;
/// Milliseconds per capture frame (WebRTC VAD accepts 10/20/30 ms).
pub const FRAME_MS: u32 = 30;
/// Samples per capture frame: 480 at 16 kHz.
pub const FRAME_SAMPLES: usize = (MIC_SAMPLE_RATE as usize * FRAME_MS as usize) / 1000;
/// Streamed TTS audio is raw 16-bit mono PCM at this rate.
pub const STREAM_SAMPLE_RATE: u32 = 44_100;

pub use mic::{list_devices, FrameSource, MicConfig, MicError, MicFrames};
pub use player::{Player, PlayerConfig};
