//! Licensed fixed-frame wake word engine.
//!
//! The engine consumes exactly `frame_length` samples per call (512 at
//! 16 kHz), while the microphone delivers 480. [`FrameChunker`] reconciles
//! the two. The chunker must be fed continuously, even during mute, so the
//! engine's sliding window stays in sync with the live audio stream;
//! `reset()` therefore clears only the chunker, never the engine.

/// Concatenates incoming frames and hands them back in fixed strides.
#[derive(Debug)]
pub struct FrameChunker {
    buf: Vec<i16>,
    stride: usize,
}

impl FrameChunker {
    pub fn new(stride: usize) -> Self {
        Self {
            buf: Vec::with_capacity(stride * 2),
            stride,
        }
    }

    pub fn push(&mut self, frame: &[i16]) {
        self.buf.extend_from_slice(frame);
    }

    pub fn next_stride(&mut self) -> Option<Vec<i16>> {
        if self.buf.len() < self.stride {
            return None;
        }
        Some(self.buf.drain(..self.stride).collect())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(feature = "porcupine")]
mod engine {
    use super::FrameChunker;
    use crate::wakeword::{WakeWordEngine, WakeWordError};
    use porcupine::{BuiltinKeywords, Porcupine, PorcupineBuilder};

    /// Log a processing heartbeat every ~3 s (512 samples ≈ 32 ms per frame).
    const HEARTBEAT_EVERY_FRAMES: u64 = 94;

    pub struct PorcupineEngine {
        engine: Porcupine,
        chunker: FrameChunker,
        processed: u64,
    }

    impl PorcupineEngine {
        pub fn new(
            access_key: &str,
            keyword: &str,
            keyword_path: &str,
            sensitivity: f32,
        ) -> Result<Self, WakeWordError> {
            let engine = if keyword_path.is_empty() {
                let builtin = builtin_keyword(keyword)?;
                PorcupineBuilder::new_with_keywords(access_key, &[builtin])
                    .sensitivities(&[sensitivity])
                    .init()
                    .map_err(|e| WakeWordError::Engine(e.to_string()))?
            } else {
                PorcupineBuilder::new_with_keyword_paths(access_key, &[keyword_path])
                    .sensitivities(&[sensitivity])
                    .init()
                    .map_err(|e| WakeWordError::Engine(e.to_string()))?
            };
            let stride = engine.frame_length() as usize;
            log::info!(
                "Porcupine engine loaded: '{}' (sensitivity={:.2}, frame_length={})",
                if keyword_path.is_empty() { keyword } else { keyword_path },
                sensitivity,
                stride
            );
            Ok(Self {
                engine,
                chunker: FrameChunker::new(stride),
                processed: 0,
            })
        }

        fn pump(&mut self, frame: &[i16]) -> Result<bool, WakeWordError> {
            self.chunker.push(frame);
            let mut detected = false;
            while let Some(stride) = self.chunker.next_stride() {
                let index = self
                    .engine
                    .process(&stride)
                    .map_err(|e| WakeWordError::Engine(e.to_string()))?;
                self.processed += 1;
                if index >= 0 {
                    log::info!(
                        "Wake word detected! (keyword_index={}, after {} frames)",
                        index,
                        self.processed
                    );
                    detected = true;
                } else if self.processed % HEARTBEAT_EVERY_FRAMES == 0 {
                    let rms = rms(&stride);
                    log::info!(
                        "Porcupine: {} frames processed, rms={}",
                        self.processed,
                        rms
                    );
                }
            }
            Ok(detected)
        }
    }

    impl WakeWordEngine for PorcupineEngine {
        fn detect(&mut self, frame: &[i16]) -> Result<bool, WakeWordError> {
            self.pump(frame)
        }

        /// Only the re-chunker is cleared: continuous feeding keeps the
        /// engine itself warm across mutes.
        fn reset(&mut self) {
            self.chunker.clear();
            self.processed = 0;
            log::info!("Porcupine buffer cleared");
        }

        fn feed_muted(&mut self, frame: &[i16]) {
            if let Err(e) = self.pump(frame) {
                log::warn!("Porcupine feed during mute failed: {}", e);
            }
        }
    }

    fn builtin_keyword(name: &str) -> Result<BuiltinKeywords, WakeWordError> {
        match name.to_ascii_lowercase().as_str() {
            "alexa" => Ok(BuiltinKeywords::Alexa),
            "bumblebee" => Ok(BuiltinKeywords::Bumblebee),
            "computer" => Ok(BuiltinKeywords::Computer),
            "jarvis" => Ok(BuiltinKeywords::Jarvis),
            "picovoice" => Ok(BuiltinKeywords::Picovoice),
            "porcupine" => Ok(BuiltinKeywords::Porcupine),
            "terminator" => Ok(BuiltinKeywords::Terminator),
            other => Err(WakeWordError::Engine(format!(
                "unknown built-in keyword '{other}'; set PORCUPINE_KEYWORD_PATH for a custom model"
            ))),
        }
    }

    fn rms(frame: &[i16]) -> i32 {
        if frame.is_empty() {
            return 0;
        }
        let sum: i64 = frame.iter().map(|&s| (s as i64) * (s as i64)).sum();
        ((sum / frame.len() as i64) as f64).sqrt() as i32
    }
}

#[cfg(feature = "porcupine")]
pub use self::engine::PorcupineEngine;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_strides_across_frames() {
        // 480-sample frames against a 512-sample stride: the first stride is
        // ready after two pushes, and leftovers carry over.
        let mut chunker = FrameChunker::new(512);
        chunker.push(&vec![1i16; 480]);
        assert!(chunker.next_stride().is_none());
        chunker.push(&vec![2i16; 480]);

        let stride = chunker.next_stride().unwrap();
        assert_eq!(stride.len(), 512);
        assert_eq!(stride[479], 1);
        assert_eq!(stride[480], 2);
        assert!(chunker.next_stride().is_none());

        // 448 leftover + 480 = 928 → one more stride, 416 left
        chunker.push(&vec![3i16; 480]);
        let stride = chunker.next_stride().unwrap();
        assert_eq!(stride.len(), 512);
        assert!(chunker.next_stride().is_none());
    }

    #[test]
    fn test_chunker_clear_drops_partial_data() {
        let mut chunker = FrameChunker::new(512);
        chunker.push(&vec![1i16; 480]);
        chunker.clear();
        chunker.push(&vec![2i16; 480]);
        assert!(chunker.next_stride().is_none());
        chunker.push(&vec![2i16; 480]);
        let stride = chunker.next_stride().unwrap();
        assert!(stride.iter().all(|&s| s == 2));
    }

    #[test]
    fn test_chunker_exact_multiple() {
        let mut chunker = FrameChunker::new(480);
        chunker.push(&vec![5i16; 960]);
        assert_eq!(chunker.next_stride().unwrap().len(), 480);
        assert_eq!(chunker.next_stride().unwrap().len(), 480);
        assert!(chunker.next_stride().is_none());
    }
}
