//! Voice activity detection over 30 ms frames.

use crate::audio::FRAME_SAMPLES;
use thiserror::Error;
use webrtc_vad::{SampleRate, Vad, VadMode};

#[derive(Error, Debug)]
pub enum VadError {
    #[error("Invalid VAD aggressiveness {0} (must be 0-3)")]
    Aggressiveness(u8),
    #[error("Invalid frame length {0} (expected 480 samples)")]
    FrameSize(usize),
    #[error("VAD rejected the frame")]
    Engine,
}

/// Binary speech/non-speech classification per frame. Stateless: every frame
/// is judged on its own.
pub trait SpeechDetector {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool, VadError>;
}

pub struct WebRtcSpeechDetector {
    vad: Vad,
}

impl WebRtcSpeechDetector {
    pub fn new(aggressiveness: u8) -> Result<Self, VadError> {
        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(VadError::Aggressiveness(other)),
        };
        log::info!("WebRTC VAD ready (aggressiveness={})", aggressiveness);
        Ok(Self {
            vad: Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, mode),
        })
    }
}

impl SpeechDetector for WebRtcSpeechDetector {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool, VadError> {
        if frame.len() != FRAME_SAMPLES {
            return Err(VadError::FrameSize(frame.len()));
        }
        self.vad.is_voice_segment(frame).map_err(|_| VadError::Engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggressiveness_range() {
        assert!(WebRtcSpeechDetector::new(0).is_ok());
        assert!(WebRtcSpeechDetector::new(3).is_ok());
        assert!(matches!(
            WebRtcSpeechDetector::new(4),
            Err(VadError::Aggressiveness(4))
        ));
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut vad = WebRtcSpeechDetector::new(3).unwrap();
        let short = vec![0i16; 100];
        assert!(matches!(
            vad.is_speech(&short),
            Err(VadError::FrameSize(100))
        ));
    }

    #[test]
    fn test_silence_is_not_speech() {
        let mut vad = WebRtcSpeechDetector::new(3).unwrap();
        let silence = vec![0i16; FRAME_SAMPLES];
        assert!(!vad.is_speech(&silence).unwrap());
    }
}
