//! TFLite model wrappers for the open wake word engine.
//!
//! Three models cooperate: melspectrogram (raw audio → mel features),
//! embedding (mel context → a 96-value acoustic embedding), and the wake
//! word classifier (an embedding window → a confidence score).

use super::WakeWordError;
use std::path::Path;
use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor;

/// 80 ms of 16 kHz audio per melspectrogram invocation.
pub const MEL_CHUNK_SAMPLES: usize = 1280;
/// Mel frames the embedding model needs as context.
pub const EMBEDDING_MEL_FRAMES: usize = 76;
/// Embedding model input size: 76 frames x 32 bins.
pub const EMBEDDING_INPUT_LEN: usize = EMBEDDING_MEL_FRAMES * 32;
/// Embedding vector length.
pub const EMBEDDING_LEN: usize = 96;
/// Embeddings the classifier needs as context (~1.28 s).
pub const CLASSIFIER_WINDOW: usize = 16;

fn load_model(path: &str, what: &str) -> Result<Model<'static>, WakeWordError> {
    if !Path::new(path).exists() {
        return Err(WakeWordError::ModelLoad(format!(
            "{what} model not found: {path}"
        )));
    }
    Model::new(path)
        .map_err(|e| WakeWordError::ModelLoad(format!("failed to load {what} model: {e}")))
}

/// Run one inference with the input resized to `[1, input.len()]`.
///
/// A fresh interpreter per call keeps the model shareable and sidesteps
/// self-referential borrows; the models are small enough that setup cost is
/// negligible next to the 80 ms audio cadence.
fn run(model: &Model<'static>, input: &[f32]) -> Result<Vec<f32>, WakeWordError> {
    let mut options = Options::default();
    options.thread_count = 1;

    let interpreter = Interpreter::new(model, Some(options))
        .map_err(|e| WakeWordError::Inference(format!("interpreter: {e}")))?;
    interpreter
        .resize_input(0, tensor::Shape::new(vec![1, input.len()]))
        .map_err(|e| WakeWordError::Inference(format!("resize: {e}")))?;
    interpreter
        .allocate_tensors()
        .map_err(|e| WakeWordError::Inference(format!("allocate: {e}")))?;
    interpreter
        .copy(input, 0)
        .map_err(|e| WakeWordError::Inference(format!("copy input: {e}")))?;
    interpreter
        .invoke()
        .map_err(|e| WakeWordError::Inference(format!("invoke: {e}")))?;
    let output = interpreter
        .output(0)
        .map_err(|e| WakeWordError::Inference(format!("output: {e}")))?;
    Ok(output.data::<f32>().to_vec())
}

pub struct MelspecModel {
    model: Model<'static>,
}

impl MelspecModel {
    pub fn new(path: &str) -> Result<Self, WakeWordError> {
        Ok(Self {
            model: load_model(path, "melspectrogram")?,
        })
    }

    /// 1280 samples → 160 mel features, with the OpenWakeWord x/10 + 2
    /// transform applied.
    pub fn predict(&self, audio: &[f32]) -> Result<Vec<f32>, WakeWordError> {
        if audio.len() != MEL_CHUNK_SAMPLES {
            return Err(WakeWordError::InvalidInput(format!(
                "expected {MEL_CHUNK_SAMPLES} samples, got {}",
                audio.len()
            )));
        }
        let raw = run(&self.model, audio)?;
        Ok(raw.iter().map(|&x| x / 10.0 + 2.0).collect())
    }
}

pub struct EmbeddingModel {
    model: Model<'static>,
}

impl EmbeddingModel {
    pub fn new(path: &str) -> Result<Self, WakeWordError> {
        Ok(Self {
            model: load_model(path, "embedding")?,
        })
    }

    /// 76x32 mel features → 96 embedding features.
    pub fn predict(&self, mel_features: &[f32]) -> Result<Vec<f32>, WakeWordError> {
        if mel_features.len() != EMBEDDING_INPUT_LEN {
            return Err(WakeWordError::InvalidInput(format!(
                "expected {EMBEDDING_INPUT_LEN} mel features, got {}",
                mel_features.len()
            )));
        }
        run(&self.model, mel_features)
    }
}

pub struct ClassifierModel {
    model: Model<'static>,
}

impl ClassifierModel {
    pub fn new(path: &str) -> Result<Self, WakeWordError> {
        Ok(Self {
            model: load_model(path, "wake word")?,
        })
    }

    /// 16x96 embedding window → confidence score in [0, 1].
    pub fn predict(&self, embeddings: &[f32]) -> Result<f32, WakeWordError> {
        if embeddings.len() != CLASSIFIER_WINDOW * EMBEDDING_LEN {
            return Err(WakeWordError::InvalidInput(format!(
                "expected {} embedding features, got {}",
                CLASSIFIER_WINDOW * EMBEDDING_LEN,
                embeddings.len()
            )));
        }
        let output = run(&self.model, embeddings)?;
        match output.first() {
            Some(&score) => Ok(score.clamp(0.0, 1.0)),
            None => Err(WakeWordError::Inference("empty classifier output".to_string())),
        }
    }
}
