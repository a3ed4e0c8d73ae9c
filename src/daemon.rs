//! Dialog orchestrator.
//!
//! Consumes capture events and drives the pipeline:
//! mic → wake word → VAD → ASR → chat → TTS → speaker, muting the
//! microphone around every playback so the assistant never hears itself.

use crate::asr::AsrClient;
use crate::audio::player::PlaybackError;
use crate::audio::{wav, Player, PlayerConfig};
use crate::capture::{CaptureControl, CaptureEvent};
use crate::config::Settings;
use crate::error::AgentError;
use crate::llm::{ChatClient, ChatConfig};
use crate::speech::clean_for_speech;
use crate::tts::TtsClient;
use secrecy::{ExposeSecret, SecretBox};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Spoken when the pipeline cannot complete a turn.
const APOLOGY_PHRASE: &str =
    "I'm sorry, my system is having a problem. Can you ask again?";
/// Short budget for the wake acknowledgement; falling back to a beep beats
/// keeping the user waiting.
const ACK_TTS_TIMEOUT: Duration = Duration::from_secs(3);

const BEEP_VOLUME: f32 = 0.5;
/// Played when the acknowledgement TTS is unavailable.
const ACK_FALLBACK_BEEP: (f32, u32) = (880.0, 200);
/// "Speak now" cue after the acknowledgement.
const SPEAK_NOW_BEEP: (f32, u32) = (1200.0, 100);
/// "Ok, done" cue after a reply finishes playing.
const DONE_BEEP: (f32, u32) = (660.0, 150);
/// Last resort when even the apology cannot be synthesized.
const APOLOGY_FALLBACK_BEEP: (f32, u32) = (440.0, 500);

struct Inner {
    asr: AsrClient,
    llm: ChatClient,
    tts: TtsClient,
    player: Arc<Player>,
    control: CaptureControl,
    busy: AtomicBool,

    ack_phrase: String,
    mute_during_playback: bool,
    conversation_mode: bool,
    aec_active: bool,
}

/// Orchestrates the full pipeline:
/// Mic → Wake Word → VAD → ASR → LLM → TTS → Speaker.
pub struct Daemon {
    inner: Arc<Inner>,
}

impl Daemon {
    pub fn new(settings: &Settings, control: CaptureControl) -> Result<Self, AgentError> {
        let asr = AsrClient::new(
            &settings.asr_base_url,
            Duration::from_secs(settings.asr_timeout_secs),
        )?;
        let llm = ChatClient::new(ChatConfig {
            base_url: settings.llm_base_url.clone(),
            api_key: SecretBox::new(Box::new(settings.llm_api_key.expose_secret().clone())),
            model: settings.llm_model.clone(),
            max_tokens: settings.llm_max_tokens,
            system_prompt: settings.llm_system_prompt.clone(),
            timeout: Duration::from_secs(settings.llm_timeout_secs),
        })?;
        let tts = TtsClient::new(
            &settings.tts_base_url,
            &settings.tts_voice,
            Duration::from_secs(settings.tts_timeout_secs),
        )?;
        let player = Arc::new(Player::new(PlayerConfig {
            device_index: settings.spk_device_index,
            gain: settings.tts_volume_gain,
        }));

        Ok(Self {
            inner: Arc::new(Inner {
                asr,
                llm,
                tts,
                player,
                control,
                busy: AtomicBool::new(false),
                ack_phrase: settings.wake_word_ack_phrase.clone(),
                mute_during_playback: settings.mic_mute_during_playback,
                conversation_mode: settings.conversation_mode,
                aec_active: detect_aec(),
            }),
        })
    }

    /// Consume capture events until the channel closes. Heavy work runs on
    /// detached workers; this loop must stay responsive.
    pub async fn run(&self, mut events: mpsc::Receiver<CaptureEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                CaptureEvent::WakeWord => {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.handle_wake_word().await });
                }
                CaptureEvent::Utterance(wav_bytes) => {
                    if self
                        .inner
                        .busy
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        log::debug!("Pipeline busy; utterance dropped");
                        continue;
                    }
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        inner.pipeline(wav_bytes).await;
                        inner.busy.store(false, Ordering::SeqCst);
                    });
                }
                CaptureEvent::ListenTimeout => {
                    log::info!("Listen window expired without a command");
                }
            }
        }
        log::info!("Capture event channel closed; orchestrator exiting");
    }

    /// Clear the conversation history.
    pub fn reset_history(&self) {
        self.inner.llm.reset();
    }
}

impl Inner {
    /// Wake word acknowledgement: mute, speak the ack (or beep), cue the
    /// user, then resume straight to LISTENING so the command is captured.
    async fn handle_wake_word(&self) {
        if self.ack_phrase.is_empty() {
            return;
        }

        log::info!("Playing wake word acknowledgement ...");
        if self.mute_during_playback {
            self.control.mute();
        }

        let ack = match self.tts.synthesize(&self.ack_phrase, Some(ACK_TTS_TIMEOUT)).await {
            Ok(audio) => audio,
            Err(e) => {
                log::debug!("Ack TTS unavailable ({}); playing beep", e);
                match wav::sine_beep(ACK_FALLBACK_BEEP.0, ACK_FALLBACK_BEEP.1, BEEP_VOLUME) {
                    Ok(beep) => beep,
                    Err(e) => {
                        log::error!("Beep synthesis failed: {}", e);
                        Vec::new()
                    }
                }
            }
        };
        if !ack.is_empty() {
            self.play(ack).await;
        }
        self.beep(SPEAK_NOW_BEEP).await;

        if self.mute_during_playback {
            // Back to LISTENING, not IDLE: the command follows immediately.
            self.control.resume_listening();
        }
    }

    /// One utterance through ASR → chat → TTS → speaker.
    async fn pipeline(&self, wav_bytes: Vec<u8>) {
        log::info!("ASR: transcribing ...");
        let user_text = match self.asr.transcribe(&wav_bytes).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("ASR failed: {}", e);
                self.apologize().await;
                return;
            }
        };
        log::info!("User said: {}", user_text);

        log::info!("Chat: generating reply ...");
        let reply = match self.llm.chat(&user_text).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Chat failed: {}", e);
                self.apologize().await;
                return;
            }
        };
        log::info!("Assistant: {}", reply);

        let speech = clean_for_speech(&reply);
        if speech.is_empty() {
            log::debug!("Reply cleaned to nothing; skipping synthesis");
            return;
        }

        log::info!(
            "Playing response ... (mute={} aec={})",
            self.mute_during_playback,
            self.aec_active
        );
        if self.mute_during_playback {
            self.control.mute();
        }

        let spoken = self.speak_streaming(&speech).await;
        match spoken {
            Ok(()) => self.beep(DONE_BEEP).await,
            Err(e) => log::warn!("Reply playback failed: {}", e),
        }

        if self.mute_during_playback {
            if self.conversation_mode {
                self.control.resume_conversation();
            } else {
                self.control.unmute();
            }
        }
    }

    async fn speak_streaming(&self, text: &str) -> Result<(), AgentError> {
        let chunks = self.tts.synthesize_stream(text).await?;
        let player = Arc::clone(&self.player);
        tokio::task::spawn_blocking(move || player.play_stream(chunks))
            .await
            .map_err(|e| PlaybackError::Stream(format!("playback worker panicked: {e}")))??;
        Ok(())
    }

    /// Tell the user the turn failed. Muted around playback like any other
    /// speech; beeps when TTS itself is the problem.
    async fn apologize(&self) {
        let audio = match self.tts.synthesize(APOLOGY_PHRASE, Some(ACK_TTS_TIMEOUT)).await {
            Ok(audio) => audio,
            Err(e) => {
                log::debug!("Apology TTS unavailable ({}); playing beep", e);
                match wav::sine_beep(
                    APOLOGY_FALLBACK_BEEP.0,
                    APOLOGY_FALLBACK_BEEP.1,
                    BEEP_VOLUME,
                ) {
                    Ok(beep) => beep,
                    Err(e) => {
                        log::error!("Beep synthesis failed: {}", e);
                        return;
                    }
                }
            }
        };

        if self.mute_during_playback {
            self.control.mute();
        }
        self.play(audio).await;
        if self.mute_during_playback {
            self.control.unmute();
        }
    }

    async fn beep(&self, (freq, ms): (f32, u32)) {
        match wav::sine_beep(freq, ms, BEEP_VOLUME) {
            Ok(audio) => self.play(audio).await,
            Err(e) => log::error!("Beep synthesis failed: {}", e),
        }
    }

    async fn play(&self, audio: Vec<u8>) {
        let player = Arc::clone(&self.player);
        match tokio::task::spawn_blocking(move || player.play(&audio)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Playback error: {}", e),
            Err(e) => log::error!("Playback worker panicked: {}", e),
        }
    }
}

/// Auto-detect whether PulseAudio AEC (module-echo-cancel) is active.
/// Software mute and AEC are independent; both can be active at once.
fn detect_aec() -> bool {
    match Command::new("pactl").args(["list", "short", "modules"]).output() {
        Ok(output) => {
            let active = String::from_utf8_lossy(&output.stdout).contains("module-echo-cancel");
            if active {
                log::info!("AEC detected: PulseAudio module-echo-cancel is loaded");
            } else {
                log::info!("AEC not detected: PulseAudio module-echo-cancel is not loaded");
            }
            active
        }
        Err(_) => {
            log::info!("AEC not detected: pactl not available");
            false
        }
    }
}
