//! Capture state machine.
//!
//! One thread owns the microphone and drives wake word detection in IDLE and
//! VAD segmentation in LISTENING. Completed utterances leave as WAV blobs on
//! a typed event channel; the orchestrator steers the machine through a
//! single mutex-guarded control record (mute, resume kind, pending engine
//! reset) that is read and cleared exactly once per frame.

use crate::audio::mic::{FrameSource, MicError};
use crate::audio::{wav, FRAME_MS, MIC_SAMPLE_RATE};
use crate::error::AgentError;
use crate::vad::SpeechDetector;
use crate::wakeword::WakeWordEngine;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pre-speech ring depth: 10 x 30 ms ≈ 300 ms of audio retained so the first
/// syllables spoken before detection completes are not lost.
const PADDING_FRAMES: usize = 10;
/// Idle heartbeat cadence: 1000 frames ≈ 30 s.
const HEARTBEAT_EVERY_FRAMES: u64 = 1000;

/// Events emitted from the capture thread to the orchestrator.
#[derive(Debug)]
pub enum CaptureEvent {
    WakeWord,
    /// A completed utterance as a WAV blob (mono, 16-bit, 16 kHz).
    Utterance(Vec<u8>),
    ListenTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeMode {
    Listening,
    Conversation,
}

#[derive(Debug, Default)]
struct ControlFlags {
    muted: bool,
    resume: Option<ResumeMode>,
    reset_pending: bool,
}

/// Handle the orchestrator uses to steer the capture loop. Cloneable; all
/// clones share one flag record.
#[derive(Clone, Default)]
pub struct CaptureControl {
    flags: Arc<Mutex<ControlFlags>>,
}

impl CaptureControl {
    /// Discard audio and force IDLE semantics until resumed. Fixed-frame
    /// wake engines keep being fed while muted.
    pub fn mute(&self) {
        self.lock().muted = true;
        log::debug!("Microphone muted");
    }

    /// Unmute and return to IDLE; schedules a wake engine reset. Used after
    /// main pipeline playback.
    pub fn unmute(&self) {
        let mut flags = self.lock();
        flags.muted = false;
        flags.resume = None;
        flags.reset_pending = true;
        log::info!("Microphone unmuted, state -> IDLE");
    }

    /// Unmute and return to LISTENING with the wake timeout. Used after the
    /// acknowledgement playback so the command that follows is captured.
    pub fn resume_listening(&self) {
        let mut flags = self.lock();
        flags.muted = false;
        flags.resume = Some(ResumeMode::Listening);
        log::info!("Microphone unmuted, state -> LISTENING");
    }

    /// Unmute and return to LISTENING with the conversation timeout. Used
    /// after a reply when conversation mode is on.
    pub fn resume_conversation(&self) {
        let mut flags = self.lock();
        flags.muted = false;
        flags.resume = Some(ResumeMode::Conversation);
        log::info!("Microphone unmuted, state -> LISTENING (conversation mode)");
    }

    /// One atomic read-and-clear per frame: resume is consumed, mute is
    /// observed.
    fn begin_frame(&self) -> (bool, Option<ResumeMode>) {
        let mut flags = self.lock();
        (flags.muted, flags.resume.take())
    }

    fn take_reset(&self) -> bool {
        let mut flags = self.lock();
        std::mem::take(&mut flags.reset_pending)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Timing parameters, in milliseconds; converted to frame counts at 30 ms
/// per frame.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Contiguous silence that closes an utterance.
    pub vad_silence_ms: u32,
    /// Minimum utterance length; shorter ones are dropped.
    pub vad_min_speech_ms: u32,
    /// Max time in LISTENING after a wake word before giving up.
    pub wake_listen_timeout_ms: u32,
    /// Max time in LISTENING during a continuing conversation.
    pub conversation_timeout_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            vad_silence_ms: 1200,
            vad_min_speech_ms: 2000,
            wake_listen_timeout_ms: 10_000,
            conversation_timeout_ms: 300_000,
        }
    }
}

impl CaptureConfig {
    fn frames(ms: u32) -> usize {
        (ms / FRAME_MS) as usize
    }
}

pub struct CaptureMachine<S, W, V> {
    source: S,
    wake: W,
    vad: V,
    control: CaptureControl,
    events: mpsc::Sender<CaptureEvent>,

    silence_limit: usize,
    min_speech: usize,
    timeout_wake: usize,
    timeout_convo: usize,

    state: CaptureState,
    ring: VecDeque<Vec<i16>>,
    voiced: Vec<Vec<i16>>,
    silence_count: usize,
    timeout_left: usize,
    in_conversation: bool,
    was_muted: bool,
    idle_frames: u64,
}

impl<S, W, V> CaptureMachine<S, W, V>
where
    S: FrameSource,
    W: WakeWordEngine,
    V: SpeechDetector,
{
    pub fn new(
        config: CaptureConfig,
        source: S,
        wake: W,
        vad: V,
        control: CaptureControl,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Self {
        Self {
            source,
            wake,
            vad,
            control,
            events,
            silence_limit: CaptureConfig::frames(config.vad_silence_ms),
            min_speech: CaptureConfig::frames(config.vad_min_speech_ms),
            timeout_wake: CaptureConfig::frames(config.wake_listen_timeout_ms),
            timeout_convo: CaptureConfig::frames(config.conversation_timeout_ms),
            state: CaptureState::Idle,
            ring: VecDeque::with_capacity(PADDING_FRAMES),
            voiced: Vec::new(),
            silence_count: 0,
            timeout_left: 0,
            in_conversation: false,
            was_muted: false,
            idle_frames: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Run until the flag clears or the source is exhausted. Transient read
    /// errors are logged and swallowed; the loop never exits on them.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            match self.source.next_frame() {
                Ok(Some(frame)) => self.step(&frame),
                Ok(None) => {
                    log::info!("Audio source closed; capture loop exiting");
                    break;
                }
                Err(e) => {
                    log::warn!("Audio read error: {}", e);
                    continue;
                }
            }
        }
    }

    /// One iteration per microphone frame; exactly one observable state
    /// transition.
    fn step(&mut self, frame: &[i16]) {
        let (muted, resume) = self.control.begin_frame();

        if muted {
            self.state = CaptureState::Idle;
            self.ring.clear();
            self.voiced.clear();
            self.silence_count = 0;
            self.was_muted = true;
            self.wake.feed_muted(frame);
            return;
        }

        if self.was_muted {
            self.was_muted = false;
            match resume {
                Some(ResumeMode::Conversation) => {
                    log::info!("Capture loop resumed, state -> LISTENING (conversation mode)")
                }
                Some(ResumeMode::Listening) => {
                    log::info!("Capture loop resumed, state -> LISTENING")
                }
                None => log::info!("Capture loop resumed, state -> IDLE"),
            }
        }

        if let Some(mode) = resume {
            self.state = CaptureState::Listening;
            self.in_conversation = mode == ResumeMode::Conversation || self.in_conversation;
            self.timeout_left = self.current_timeout();
            self.voiced.clear();
            self.silence_count = 0;
        }

        match self.state {
            CaptureState::Idle => self.step_idle(frame),
            CaptureState::Listening => self.step_listening(frame),
        }
    }

    fn step_idle(&mut self, frame: &[i16]) {
        self.idle_frames += 1;
        self.ring.push_back(frame.to_vec());
        if self.ring.len() > PADDING_FRAMES {
            self.ring.pop_front();
        }

        if self.idle_frames % HEARTBEAT_EVERY_FRAMES == 0 {
            log::info!(
                "Idle: listening for wake word ... ({}s, rms={})",
                self.idle_frames * FRAME_MS as u64 / 1000,
                rms(frame)
            );
        }

        if self.control.take_reset() {
            self.wake.reset();
        }

        let detected = match self.wake.detect(frame) {
            Ok(detected) => detected,
            Err(e) => {
                log::error!("Wake word detection failed: {}", e);
                self.force_idle();
                return;
            }
        };

        if detected {
            self.idle_frames = 0;
            self.in_conversation = false;
            self.send(CaptureEvent::WakeWord);
            // Flush the ring so the syllables preceding detection open the
            // utterance.
            self.voiced = self.ring.drain(..).collect();
            self.silence_count = 0;
            self.timeout_left = self.timeout_wake;
            self.state = CaptureState::Listening;
        }
    }

    fn step_listening(&mut self, frame: &[i16]) {
        self.timeout_left = self.timeout_left.saturating_sub(1);
        if self.timeout_left == 0 {
            if self.in_conversation {
                log::info!("Conversation timeout — returning to IDLE");
            } else {
                log::info!("Listen timeout — returning to IDLE");
            }
            self.voiced.clear();
            self.ring.clear();
            self.silence_count = 0;
            self.state = CaptureState::Idle;
            self.in_conversation = false;
            self.send(CaptureEvent::ListenTimeout);
            return;
        }

        self.voiced.push(frame.to_vec());

        let is_speech = match self.vad.is_speech(frame) {
            Ok(is_speech) => is_speech,
            Err(e) => {
                log::error!("VAD failed: {}", e);
                self.force_idle();
                return;
            }
        };

        if is_speech {
            if self.silence_count > 0 || self.voiced.len() == 1 {
                log::info!("VAD: speech detected (voiced frames: {})", self.voiced.len());
            }
            self.silence_count = 0;
            self.timeout_left = self.current_timeout();
            return;
        }

        self.silence_count += 1;
        if self.silence_count < self.silence_limit {
            return;
        }

        let duration_ms = self.voiced.len() as u32 * FRAME_MS;
        if self.voiced.len() >= self.min_speech {
            log::info!("VAD: utterance complete ({} ms), sending to ASR ...", duration_ms);
            match wav::pcm_frames_to_wav(&self.voiced, MIC_SAMPLE_RATE, 1) {
                Ok(blob) => self.send(CaptureEvent::Utterance(blob)),
                Err(e) => {
                    log::error!("WAV encoding failed: {}", e);
                    self.force_idle();
                    return;
                }
            }
            self.voiced.clear();
            self.ring.clear();
            self.silence_count = 0;
            // In conversation mode, stay LISTENING for the next turn;
            // otherwise the wake word is required again.
            if !self.in_conversation {
                self.state = CaptureState::Idle;
            }
        } else {
            // Too short: stay in LISTENING so the user can keep talking.
            // The listen timeout keeps running, so dead air still expires.
            log::info!(
                "VAD: utterance too short ({} ms < {} ms), still listening ...",
                duration_ms,
                self.min_speech as u32 * FRAME_MS
            );
            self.voiced.clear();
            self.silence_count = 0;
        }
    }

    fn current_timeout(&self) -> usize {
        if self.in_conversation {
            self.timeout_convo
        } else {
            self.timeout_wake
        }
    }

    fn force_idle(&mut self) {
        self.state = CaptureState::Idle;
        self.ring.clear();
        self.voiced.clear();
        self.silence_count = 0;
        self.in_conversation = false;
    }

    fn send(&self, event: CaptureEvent) {
        if self.events.blocking_send(event).is_err() {
            log::warn!("Event channel closed; dropping capture event");
        }
    }
}

fn rms(frame: &[i16]) -> i32 {
    if frame.is_empty() {
        return 0;
    }
    let sum: i64 = frame.iter().map(|&s| (s as i64) * (s as i64)).sum();
    ((sum / frame.len() as i64) as f64).sqrt() as i32
}

/// A running capture thread. `stop` gives the loop a 3 s budget to wind down
/// before detaching it.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    done_rx: std::sync::mpsc::Receiver<()>,
}

impl CaptureHandle {
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        match self.done_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                log::info!("Microphone capture stopped");
            }
            Err(_) => {
                log::warn!("Capture thread did not stop within 3s; detaching");
            }
        }
    }
}

/// Spawn the capture loop on a dedicated thread. The audio stack is built
/// inside the thread (cpal streams and the VAD are not `Send`); startup
/// errors from the factory propagate back to the caller.
pub fn spawn_capture<S, W, V, F>(
    factory: F,
    config: CaptureConfig,
    control: CaptureControl,
    events: mpsc::Sender<CaptureEvent>,
) -> Result<CaptureHandle, AgentError>
where
    S: FrameSource,
    W: WakeWordEngine,
    V: SpeechDetector,
    F: FnOnce() -> Result<(S, W, V), AgentError> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let running_in_thread = Arc::clone(&running);
    let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), AgentError>>();
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let (source, wake, vad) = match factory() {
                Ok(parts) => {
                    let _ = init_tx.send(Ok(()));
                    parts
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            let mut machine = CaptureMachine::new(config, source, wake, vad, control, events);
            machine.run(&running_in_thread);
            let _ = done_tx.send(());
        })
        .map_err(|e| AgentError::Capture(format!("failed to spawn capture thread: {e}")))?;

    match init_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(AgentError::Capture(
                "capture thread died during startup".to_string(),
            ))
        }
    }

    log::info!("Microphone capture started (wake word active)");
    Ok(CaptureHandle {
        running,
        thread: Some(thread),
        done_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_flag_is_consumed_once() {
        let control = CaptureControl::default();
        control.resume_listening();

        let (muted, resume) = control.begin_frame();
        assert!(!muted);
        assert_eq!(resume, Some(ResumeMode::Listening));

        let (_, resume) = control.begin_frame();
        assert_eq!(resume, None);
    }

    #[test]
    fn test_unmute_schedules_reset_and_clears_resume() {
        let control = CaptureControl::default();
        control.mute();
        control.resume_listening();
        control.unmute();

        let (muted, resume) = control.begin_frame();
        assert!(!muted);
        assert_eq!(resume, None);
        assert!(control.take_reset());
        assert!(!control.take_reset());
    }

    #[test]
    fn test_mute_persists_across_frames() {
        let control = CaptureControl::default();
        control.mute();
        assert!(control.begin_frame().0);
        assert!(control.begin_frame().0);
        control.resume_conversation();
        let (muted, resume) = control.begin_frame();
        assert!(!muted);
        assert_eq!(resume, Some(ResumeMode::Conversation));
    }

    #[test]
    fn test_config_frame_conversion() {
        assert_eq!(CaptureConfig::frames(1200), 40);
        assert_eq!(CaptureConfig::frames(2000), 66);
        assert_eq!(CaptureConfig::frames(10_000), 333);
    }
}
