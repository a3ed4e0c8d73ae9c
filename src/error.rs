use crate::asr::AsrError;
use crate::audio::mic::MicError;
use crate::audio::player::PlaybackError;
use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::tts::TtsError;
use crate::vad::VadError;
use crate::wakeword::WakeWordError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Microphone error: {0}")]
    Mic(#[from] MicError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Wake word error: {0}")]
    WakeWord(#[from] WakeWordError),

    #[error("VAD error: {0}")]
    Vad(#[from] VadError),

    #[error("ASR error: {0}")]
    Asr(#[from] AsrError),

    #[error("Chat error: {0}")]
    Llm(#[from] LlmError),

    #[error("TTS error: {0}")]
    Tts(#[from] TtsError),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Capture thread error: {0}")]
    Capture(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
