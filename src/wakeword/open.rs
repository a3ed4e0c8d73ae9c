//! Open wake word engine: a three-stage TFLite pipeline fed with
//! variable-sized microphone frames.

use super::model::{
    ClassifierModel, EmbeddingModel, MelspecModel, CLASSIFIER_WINDOW, EMBEDDING_INPUT_LEN,
    MEL_CHUNK_SAMPLES,
};
use super::{WakeWordEngine, WakeWordError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Melspectrogram outputs retained: 16 x 5 frames = 80 mel frames, from
/// which the most recent 76 feed the embedding model.
const MELSPEC_WINDOW: usize = 16;
/// Log the best score roughly every 3 s of idle audio (80 ms per chunk).
const SCORE_LOG_EVERY_CHUNKS: u64 = 37;

#[derive(Debug, Clone)]
pub struct OpenWakeWordConfig {
    pub melspec_model_path: String,
    pub embedding_model_path: String,
    pub wakeword_model_path: String,
    /// Detection fires when the score reaches this value.
    pub threshold: f32,
    /// Minimum time between detections; sliding windows would otherwise
    /// re-trigger on the same utterance.
    pub debounce_ms: u64,
}

impl Default for OpenWakeWordConfig {
    fn default() -> Self {
        Self {
            melspec_model_path: "models/melspectrogram.tflite".to_string(),
            embedding_model_path: "models/embedding_model.tflite".to_string(),
            wakeword_model_path: "models/hey_jarvis_v0.1.tflite".to_string(),
            threshold: 0.5,
            debounce_ms: 1000,
        }
    }
}

pub struct OpenWakeWord {
    melspec: MelspecModel,
    embedding: EmbeddingModel,
    classifier: ClassifierModel,
    threshold: f32,
    debounce: Duration,

    /// Incoming 480-sample frames buffered until an 80 ms stride is ready.
    pending: Vec<i16>,
    melspec_window: VecDeque<Vec<f32>>,
    embedding_window: VecDeque<Vec<f32>>,
    last_detection: Option<Instant>,
    chunks_processed: u64,
}

impl OpenWakeWord {
    pub fn new(config: OpenWakeWordConfig) -> Result<Self, WakeWordError> {
        let melspec = MelspecModel::new(&config.melspec_model_path)?;
        let embedding = EmbeddingModel::new(&config.embedding_model_path)?;
        let classifier = ClassifierModel::new(&config.wakeword_model_path)?;
        log::info!(
            "OpenWakeWord engine loaded: {} (threshold={:.2})",
            config.wakeword_model_path,
            config.threshold
        );
        Ok(Self {
            melspec,
            embedding,
            classifier,
            threshold: config.threshold,
            debounce: Duration::from_millis(config.debounce_ms),
            pending: Vec::with_capacity(MEL_CHUNK_SAMPLES * 2),
            melspec_window: VecDeque::with_capacity(MELSPEC_WINDOW),
            embedding_window: VecDeque::with_capacity(CLASSIFIER_WINDOW),
            last_detection: None,
            chunks_processed: 0,
        })
    }

    fn process_chunk(&mut self, chunk: &[i16]) -> Result<bool, WakeWordError> {
        self.chunks_processed += 1;
        let audio: Vec<f32> = chunk.iter().map(|&s| s as f32).collect();

        let mel = self.melspec.predict(&audio)?;
        self.melspec_window.push_back(mel);
        if self.melspec_window.len() > MELSPEC_WINDOW {
            self.melspec_window.pop_front();
        }
        if self.melspec_window.len() < MELSPEC_WINDOW {
            return Ok(false);
        }

        // Take the most recent 76 mel frames (32 bins each); zero-pad at the
        // front if the window is still filling after a reset.
        let flat: Vec<f32> = self.melspec_window.iter().flatten().copied().collect();
        let total_frames = flat.len() / 32;
        let start = total_frames.saturating_sub(76);
        let recent = &flat[start * 32..];
        let mut input = vec![0.0f32; EMBEDDING_INPUT_LEN];
        let copy_len = recent.len().min(EMBEDDING_INPUT_LEN);
        input[EMBEDDING_INPUT_LEN - copy_len..].copy_from_slice(&recent[..copy_len]);

        let embedding = self.embedding.predict(&input)?;
        self.embedding_window.push_back(embedding);
        if self.embedding_window.len() > CLASSIFIER_WINDOW {
            self.embedding_window.pop_front();
        }
        if self.embedding_window.len() < CLASSIFIER_WINDOW {
            return Ok(false);
        }

        let features: Vec<f32> = self.embedding_window.iter().flatten().copied().collect();
        let score = self.classifier.predict(&features)?;

        if self.chunks_processed % SCORE_LOG_EVERY_CHUNKS == 0 {
            log::info!(
                "Wake word score: {:.4} (threshold: {:.2})",
                score,
                self.threshold
            );
        }

        if score < self.threshold {
            return Ok(false);
        }

        let now = Instant::now();
        if let Some(last) = self.last_detection {
            if now.duration_since(last) < self.debounce {
                log::debug!("Detection debounced (score={:.4})", score);
                return Ok(false);
            }
        }
        self.last_detection = Some(now);
        log::info!("Wake word detected! (score={:.4})", score);
        Ok(true)
    }
}

impl WakeWordEngine for OpenWakeWord {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, WakeWordError> {
        self.pending.extend_from_slice(frame);
        let mut detected = false;
        while self.pending.len() >= MEL_CHUNK_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..MEL_CHUNK_SAMPLES).collect();
            if self.process_chunk(&chunk)? {
                detected = true;
            }
        }
        Ok(detected)
    }

    /// Drop all accumulated context. After a mute the feature windows are
    /// stale, so this is equivalent to constructing the engine anew; it then
    /// needs ~1.3 s of audio to rebuild context before detecting again.
    fn reset(&mut self) {
        self.pending.clear();
        self.melspec_window.clear();
        self.embedding_window.clear();
        self.last_detection = None;
        log::info!("OpenWakeWord state reset");
    }
}
