//! Wake word detection: one capability, two interchangeable engines.

mod model;
mod open;
mod porcupine;

pub use self::open::{OpenWakeWord, OpenWakeWordConfig};
pub use self::porcupine::FrameChunker;
#[cfg(feature = "porcupine")]
pub use self::porcupine::PorcupineEngine;

use crate::config::{Settings, WakeEngineKind};
use secrecy::ExposeSecret;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakeWordError {
    #[error("Model loading error: {0}")]
    ModelLoad(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Engine error: {0}")]
    Engine(String),
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// The wake word capability: feed a frame, learn whether the phrase was
/// heard, and reset after a mute.
pub trait WakeWordEngine {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, WakeWordError>;

    /// Clear whatever state went stale across a mute. Variable-frame engines
    /// re-init their context; fixed-frame engines clear only their
    /// re-chunker.
    fn reset(&mut self);

    /// Called for every frame read while muted. Engines whose temporal
    /// context must not desynchronize from the live stream override this;
    /// detections are ignored.
    fn feed_muted(&mut self, _frame: &[i16]) {}
}

impl<T: WakeWordEngine + ?Sized> WakeWordEngine for Box<T> {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, WakeWordError> {
        (**self).detect(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn feed_muted(&mut self, frame: &[i16]) {
        (**self).feed_muted(frame)
    }
}

/// Owned engine parameters, extracted from [`Settings`] so they can move
/// into the capture thread.
pub enum EngineConfig {
    OpenWakeWord(OpenWakeWordConfig),
    Porcupine {
        access_key: String,
        keyword: String,
        keyword_path: String,
        sensitivity: f32,
    },
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.wake_engine {
            WakeEngineKind::OpenWakeWord => EngineConfig::OpenWakeWord(OpenWakeWordConfig {
                melspec_model_path: settings.oww_melspec_model_path.clone(),
                embedding_model_path: settings.oww_embedding_model_path.clone(),
                wakeword_model_path: settings.oww_wakeword_model_path.clone(),
                threshold: settings.oww_threshold,
                ..Default::default()
            }),
            WakeEngineKind::Porcupine => EngineConfig::Porcupine {
                access_key: settings.porcupine_access_key.expose_secret().clone(),
                keyword: settings.porcupine_keyword.clone(),
                keyword_path: settings.porcupine_keyword_path.clone(),
                sensitivity: settings.porcupine_sensitivity,
            },
        }
    }
}

pub fn build_engine(config: EngineConfig) -> Result<Box<dyn WakeWordEngine>, WakeWordError> {
    match config {
        EngineConfig::OpenWakeWord(config) => Ok(Box::new(OpenWakeWord::new(config)?)),
        #[cfg(feature = "porcupine")]
        EngineConfig::Porcupine {
            access_key,
            keyword,
            keyword_path,
            sensitivity,
        } => Ok(Box::new(PorcupineEngine::new(
            &access_key,
            &keyword,
            &keyword_path,
            sensitivity,
        )?)),
        #[cfg(not(feature = "porcupine"))]
        EngineConfig::Porcupine { .. } => Err(WakeWordError::Unavailable(
            "this build does not include the porcupine engine; rebuild with --features porcupine"
                .to_string(),
        )),
    }
}
