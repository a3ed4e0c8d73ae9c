use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Which wake word engine drives the IDLE state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEngineKind {
    /// Open TFLite pipeline; accepts variable-sized frames.
    OpenWakeWord,
    /// Licensed Picovoice engine; requires fixed-size frames and an access key.
    Porcupine,
}

impl FromStr for WakeEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openwakeword" => Ok(WakeEngineKind::OpenWakeWord),
            "porcupine" => Ok(WakeEngineKind::Porcupine),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

/// Runtime settings, loaded once at startup from the environment.
///
/// Every key is optional and falls back to the documented default; the only
/// hard requirement is `PORCUPINE_ACCESS_KEY` when `WAKE_WORD_ENGINE=porcupine`.
#[derive(Debug)]
pub struct Settings {
    // Service roots
    pub asr_base_url: String,
    pub tts_base_url: String,
    pub llm_base_url: String,

    // Chat parameters
    pub llm_api_key: SecretBox<String>,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    pub llm_system_prompt: String,

    // TTS
    pub tts_voice: String,
    pub tts_volume_gain: f32,

    // Audio devices (-1 = system default)
    pub mic_device_index: i32,
    pub spk_device_index: i32,

    // VAD tuning
    pub vad_aggressiveness: u8,
    pub vad_silence_ms: u32,
    pub vad_min_speech_ms: u32,

    // Wake word
    pub wake_engine: WakeEngineKind,
    pub oww_melspec_model_path: String,
    pub oww_embedding_model_path: String,
    pub oww_wakeword_model_path: String,
    pub oww_threshold: f32,
    pub porcupine_access_key: SecretBox<String>,
    pub porcupine_keyword: String,
    pub porcupine_keyword_path: String,
    pub porcupine_sensitivity: f32,

    // Dialog timing
    pub wake_listen_timeout_ms: u32,
    pub conversation_timeout_ms: u32,
    pub wake_word_ack_phrase: String,
    pub conversation_mode: bool,

    // Self-echo avoidance
    pub mic_mute_during_playback: bool,

    // HTTP timeouts (seconds)
    pub asr_timeout_secs: u64,
    pub tts_timeout_secs: u64,
    pub llm_timeout_secs: u64,

    // Logging
    pub log_file: String,
    pub log_level: String,
}

impl Settings {
    /// Load settings from environment variables (and `.env` when present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = Self {
            asr_base_url: env_or("ASR_BASE_URL", "http://localhost:8005"),
            tts_base_url: env_or("TTS_BASE_URL", "http://localhost:8006"),
            llm_base_url: env_or("LLM_BASE_URL", "http://localhost:11434/v1"),

            llm_api_key: secret(env_or("LLM_API_KEY", "nokey")),
            llm_model: env_or("LLM_MODEL", "llama3"),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", 150)?,
            llm_system_prompt: env_or(
                "LLM_SYSTEM_PROMPT",
                "You are a helpful voice assistant. Your responses will be spoken aloud \
                 via text-to-speech. Keep answers to 1-3 short sentences. No bullet \
                 points, no lists, no markdown, no emojis.",
            ),

            tts_voice: env_or("TTS_VOICE", "default"),
            tts_volume_gain: env_parse("TTS_VOLUME_GAIN", 1.0f32)?,

            mic_device_index: env_parse("MIC_DEVICE_INDEX", -1)?,
            spk_device_index: env_parse("SPK_DEVICE_INDEX", -1)?,

            vad_aggressiveness: env_parse("VAD_AGGRESSIVENESS", 3u8)?,
            vad_silence_ms: env_parse("VAD_SILENCE_MS", 1200)?,
            vad_min_speech_ms: env_parse("VAD_MIN_SPEECH_MS", 2000)?,

            wake_engine: env_parse("WAKE_WORD_ENGINE", WakeEngineKind::OpenWakeWord)?,
            oww_melspec_model_path: env_or(
                "WAKE_WORD_MELSPEC_MODEL_PATH",
                "models/melspectrogram.tflite",
            ),
            oww_embedding_model_path: env_or(
                "WAKE_WORD_EMBEDDING_MODEL_PATH",
                "models/embedding_model.tflite",
            ),
            oww_wakeword_model_path: env_or(
                "WAKE_WORD_MODEL_PATH",
                "models/hey_jarvis_v0.1.tflite",
            ),
            oww_threshold: env_parse("WAKE_WORD_THRESHOLD", 0.5f32)?,
            porcupine_access_key: secret(env_or("PORCUPINE_ACCESS_KEY", "")),
            porcupine_keyword: env_or("PORCUPINE_KEYWORD", "jarvis"),
            porcupine_keyword_path: env_or("PORCUPINE_KEYWORD_PATH", ""),
            porcupine_sensitivity: env_parse("PORCUPINE_SENSITIVITY", 0.5f32)?,

            wake_listen_timeout_ms: env_parse("WAKE_LISTEN_TIMEOUT_MS", 10_000)?,
            conversation_timeout_ms: env_parse("CONVERSATION_TIMEOUT_MS", 300_000)?,
            wake_word_ack_phrase: env_or("WAKE_WORD_ACK_PHRASE", "Yes sir"),
            conversation_mode: env_parse("CONVERSATION_MODE", false)?,

            mic_mute_during_playback: env_parse("MIC_MUTE_DURING_PLAYBACK", true)?,

            asr_timeout_secs: env_parse("ASR_TIMEOUT", 30)?,
            tts_timeout_secs: env_parse("TTS_TIMEOUT", 60)?,
            llm_timeout_secs: env_parse("LLM_TIMEOUT", 60)?,

            log_file: env_or("LOG_FILE", ""),
            log_level: env_or("LOG_LEVEL", "info"),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vad_aggressiveness > 3 {
            return Err(ConfigError::InvalidValue {
                key: "VAD_AGGRESSIVENESS".to_string(),
                value: self.vad_aggressiveness.to_string(),
                reason: "must be 0-3".to_string(),
            });
        }
        if self.wake_engine == WakeEngineKind::Porcupine
            && self.porcupine_access_key.expose_secret().trim().is_empty()
        {
            return Err(ConfigError::MissingEnvVar("PORCUPINE_ACCESS_KEY".to_string()));
        }
        Ok(())
    }
}

fn secret(value: String) -> SecretBox<String> {
    SecretBox::new(Box::new(value))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Load configuration with helpful error messages for development.
pub fn load_settings() -> Result<Settings, ConfigError> {
    match Settings::load() {
        Ok(settings) => {
            log::info!("Configuration loaded (wake engine: {:?})", settings.wake_engine);
            Ok(settings)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Add it to the environment or a .env file in the working directory");
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "ASR_BASE_URL",
            "VAD_AGGRESSIVENESS",
            "WAKE_WORD_ENGINE",
            "PORCUPINE_ACCESS_KEY",
            "MIC_MUTE_DURING_PLAYBACK",
            "TTS_VOLUME_GAIN",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::load().unwrap();
        assert_eq!(settings.vad_aggressiveness, 3);
        assert_eq!(settings.vad_silence_ms, 1200);
        assert_eq!(settings.vad_min_speech_ms, 2000);
        assert_eq!(settings.wake_engine, WakeEngineKind::OpenWakeWord);
        assert_eq!(settings.wake_listen_timeout_ms, 10_000);
        assert!(settings.mic_mute_during_playback);
        assert_eq!(settings.tts_volume_gain, 1.0);
    }

    #[test]
    #[serial]
    fn test_invalid_aggressiveness() {
        clear_env();
        env::set_var("VAD_AGGRESSIVENESS", "7");
        let result = Settings::load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        env::remove_var("VAD_AGGRESSIVENESS");
    }

    #[test]
    #[serial]
    fn test_porcupine_requires_access_key() {
        clear_env();
        env::set_var("WAKE_WORD_ENGINE", "porcupine");
        let result = Settings::load();
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));

        env::set_var("PORCUPINE_ACCESS_KEY", "key-for-test");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.wake_engine, WakeEngineKind::Porcupine);
        env::remove_var("WAKE_WORD_ENGINE");
        env::remove_var("PORCUPINE_ACCESS_KEY");
    }

    #[test]
    #[serial]
    fn test_engine_parse_rejects_unknown() {
        clear_env();
        env::set_var("WAKE_WORD_ENGINE", "snowboy");
        assert!(Settings::load().is_err());
        env::remove_var("WAKE_WORD_ENGINE");
    }
}
