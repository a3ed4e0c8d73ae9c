//! End-to-end capture state machine scenarios on synthetic audio.
//!
//! The machine is driven through its capability seams: a scripted frame
//! source, a marker-triggered wake engine, and an amplitude-threshold speech
//! detector. No audio hardware, models, or network involved.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use voice_agent_rs::audio::mic::{FrameSource, MicError};
use voice_agent_rs::audio::FRAME_SAMPLES;
use voice_agent_rs::capture::{
    CaptureConfig, CaptureControl, CaptureEvent, CaptureMachine, CaptureState,
};
use voice_agent_rs::vad::{SpeechDetector, VadError};
use voice_agent_rs::wakeword::{WakeWordEngine, WakeWordError};

/// First sample of a frame that makes the mock engine fire.
const WAKE_MARKER: i16 = 30_000;
/// Fill level for frames the mock VAD treats as speech.
const SPEECH_LEVEL: i16 = 5_000;

fn silence() -> Vec<i16> {
    vec![0; FRAME_SAMPLES]
}

fn filled(value: i16) -> Vec<i16> {
    vec![value; FRAME_SAMPLES]
}

fn speech() -> Vec<i16> {
    filled(SPEECH_LEVEL)
}

fn wake_frame() -> Vec<i16> {
    let mut frame = silence();
    frame[0] = WAKE_MARKER;
    frame
}

#[derive(Clone, Copy)]
enum Action {
    Mute,
    Unmute,
}

/// Scripted frame source; optionally fires control actions before handing
/// out the frame at a given index, simulating the orchestrator acting while
/// the capture loop runs.
struct ScriptSource {
    frames: VecDeque<Vec<i16>>,
    control: CaptureControl,
    actions: Vec<(usize, Action)>,
    pos: usize,
}

impl ScriptSource {
    fn new(frames: Vec<Vec<i16>>, control: CaptureControl) -> Self {
        Self {
            frames: frames.into(),
            control,
            actions: Vec::new(),
            pos: 0,
        }
    }

    fn with_actions(mut self, actions: Vec<(usize, Action)>) -> Self {
        self.actions = actions;
        self
    }
}

impl FrameSource for ScriptSource {
    fn next_frame(&mut self) -> Result<Option<Vec<i16>>, MicError> {
        for (index, action) in &self.actions {
            if *index == self.pos {
                match action {
                    Action::Mute => self.control.mute(),
                    Action::Unmute => self.control.unmute(),
                }
            }
        }
        self.pos += 1;
        Ok(self.frames.pop_front())
    }
}

#[derive(Default, Clone)]
struct WakeCounters {
    inner: Rc<RefCell<(usize, usize)>>,
}

impl WakeCounters {
    fn resets(&self) -> usize {
        self.inner.borrow().0
    }

    fn muted_feeds(&self) -> usize {
        self.inner.borrow().1
    }
}

/// Fires whenever a frame starts with the wake marker.
struct MarkerWake {
    counters: WakeCounters,
}

impl WakeWordEngine for MarkerWake {
    fn detect(&mut self, frame: &[i16]) -> Result<bool, WakeWordError> {
        Ok(frame.first().copied() == Some(WAKE_MARKER))
    }

    fn reset(&mut self) {
        self.counters.inner.borrow_mut().0 += 1;
    }

    fn feed_muted(&mut self, _frame: &[i16]) {
        self.counters.inner.borrow_mut().1 += 1;
    }
}

/// Mean-amplitude threshold stands in for the real VAD.
struct EnergyVad;

impl SpeechDetector for EnergyVad {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool, VadError> {
        let mean = frame.iter().map(|&s| (s as i64).abs()).sum::<i64>() / frame.len() as i64;
        Ok(mean > 1000)
    }
}

struct Outcome {
    events: Vec<CaptureEvent>,
    state: CaptureState,
    wake: WakeCounters,
}

impl Outcome {
    fn wake_words(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::WakeWord))
            .count()
    }

    fn timeouts(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::ListenTimeout))
            .count()
    }

    fn utterances(&self) -> Vec<&Vec<u8>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::Utterance(wav) => Some(wav),
                _ => None,
            })
            .collect()
    }
}

fn run_script(
    config: CaptureConfig,
    frames: Vec<Vec<i16>>,
    actions: Vec<(usize, Action)>,
) -> Outcome {
    let control = CaptureControl::default();
    let source = ScriptSource::new(frames, control.clone()).with_actions(actions);
    let counters = WakeCounters::default();
    let wake = MarkerWake {
        counters: counters.clone(),
    };
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let mut machine = CaptureMachine::new(config, source, wake, EnergyVad, control, tx);
    machine.run(&AtomicBool::new(true));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Outcome {
        events,
        state: machine.state(),
        wake: counters,
    }
}

fn decode_wav(wav: &[u8]) -> Vec<i16> {
    hound::WavReader::new(Cursor::new(wav))
        .unwrap()
        .into_samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

fn repeat(frame: Vec<i16>, n: usize) -> Vec<Vec<i16>> {
    std::iter::repeat(frame).take(n).collect()
}

// ── end-to-end scenarios ─────────────────────────────────────────────────

#[test]
fn silence_forever_stays_idle() {
    // 60 s of zero PCM: no callbacks, state stays IDLE.
    let outcome = run_script(CaptureConfig::default(), repeat(silence(), 2000), vec![]);
    assert!(outcome.events.is_empty());
    assert_eq!(outcome.state, CaptureState::Idle);
}

#[test]
fn wake_then_valid_command_emits_one_utterance() {
    // 10 prelude frames fill the ring, then wake, 3 s of speech, 1.5 s of
    // silence.
    let mut frames = repeat(filled(7), 10);
    frames.push(wake_frame());
    frames.extend(repeat(speech(), 100));
    frames.extend(repeat(silence(), 50));

    let outcome = run_script(CaptureConfig::default(), frames, vec![]);
    assert_eq!(outcome.wake_words(), 1);
    let utterances = outcome.utterances();
    assert_eq!(utterances.len(), 1);
    assert_eq!(outcome.state, CaptureState::Idle);

    let samples = decode_wav(utterances[0]);
    // At least 2 s of 16 kHz mono audio
    assert!(samples.len() >= 2 * 16_000);
    // The ring flush put the pre-wake prelude at the front of the utterance
    assert!(samples[..FRAME_SAMPLES].iter().all(|&s| s == 7));
}

#[test]
fn wake_then_short_utterance_stays_listening() {
    // 500 ms of speech is below the 2 s minimum: no utterance, and the
    // machine keeps listening for the user to try again.
    let mut frames = repeat(silence(), 2);
    frames.push(wake_frame());
    frames.extend(repeat(speech(), 17));
    frames.extend(repeat(silence(), 60));

    let outcome = run_script(CaptureConfig::default(), frames, vec![]);
    assert_eq!(outcome.wake_words(), 1);
    assert!(outcome.utterances().is_empty());
    assert_eq!(outcome.timeouts(), 0);
    assert_eq!(outcome.state, CaptureState::Listening);
}

#[test]
fn wake_then_silence_times_out() {
    // Wake word followed by 10+ s of silence: the listen window expires.
    let mut frames = vec![wake_frame()];
    frames.extend(repeat(silence(), 340));

    let outcome = run_script(CaptureConfig::default(), frames, vec![]);
    assert_eq!(outcome.wake_words(), 1);
    assert_eq!(outcome.timeouts(), 1);
    assert!(outcome.utterances().is_empty());
    assert_eq!(outcome.state, CaptureState::Idle);
}

#[test]
fn mute_during_listening_discards_utterance() {
    // The orchestrator mutes 1 s into the command; the utterance is
    // discarded, unmute returns to IDLE, and a wake word is required again.
    let mut frames = repeat(silence(), 2);
    frames.push(wake_frame()); // index 2
    frames.extend(repeat(speech(), 33)); // 1 s of command
    frames.extend(repeat(silence(), 10)); // muted span
    frames.extend(repeat(silence(), 5)); // unmuted, back in IDLE
    let second_wake = frames.len();
    frames.push(wake_frame());
    frames.extend(repeat(speech(), 5));

    let actions = vec![(36, Action::Mute), (46, Action::Unmute)];
    let outcome = run_script(CaptureConfig::default(), frames, actions);

    assert_eq!(outcome.wake_words(), 2, "wake word required again after mute");
    assert!(outcome.utterances().is_empty());
    assert_eq!(outcome.wake.muted_feeds(), 10, "engine fed during mute");
    assert_eq!(outcome.wake.resets(), 1, "engine reset after unmute");
    assert!(second_wake > 46);
}

#[test]
fn back_to_back_wakes_do_not_share_buffers() {
    // Shortened listen window so the first wake expires during the 2 s gap.
    let config = CaptureConfig {
        wake_listen_timeout_ms: 1500,
        ..CaptureConfig::default()
    };

    let mut frames = repeat(silence(), 12);
    frames.push(wake_frame());
    frames.extend(repeat(silence(), 67)); // ~2 s gap, expires at 1.5 s
    frames.extend(repeat(filled(3), 10)); // second prelude
    frames.push(wake_frame());
    frames.extend(repeat(speech(), 100));
    frames.extend(repeat(silence(), 45));

    let outcome = run_script(config, frames, vec![]);
    assert_eq!(outcome.wake_words(), 2);
    let utterances = outcome.utterances();
    assert_eq!(utterances.len(), 1);

    // The utterance opens with the second prelude; nothing from the first
    // wake's buffers leaked in.
    let samples = decode_wav(utterances[0]);
    assert!(samples[..FRAME_SAMPLES].iter().all(|&s| s == 3));
}

// ── boundary cases ───────────────────────────────────────────────────────

fn tight_config() -> CaptureConfig {
    CaptureConfig {
        vad_silence_ms: 300,     // 10 frames
        vad_min_speech_ms: 600,  // 20 frames
        wake_listen_timeout_ms: 10_000,
        conversation_timeout_ms: 300_000,
    }
}

#[test]
fn utterance_exactly_at_min_speech_is_accepted() {
    // wake frame (ring of 1) + 9 speech + 10 silence = 20 frames = 600 ms
    let mut frames = vec![wake_frame()];
    frames.extend(repeat(speech(), 9));
    frames.extend(repeat(silence(), 10));

    let outcome = run_script(tight_config(), frames, vec![]);
    let utterances = outcome.utterances();
    assert_eq!(utterances.len(), 1);
    assert_eq!(decode_wav(utterances[0]).len(), 20 * FRAME_SAMPLES);
}

#[test]
fn utterance_one_frame_short_is_rejected() {
    let mut frames = vec![wake_frame()];
    frames.extend(repeat(speech(), 8));
    frames.extend(repeat(silence(), 10));

    let outcome = run_script(tight_config(), frames, vec![]);
    assert!(outcome.utterances().is_empty());
    assert_eq!(outcome.state, CaptureState::Listening);
}

#[test]
fn silence_one_frame_short_does_not_close() {
    // 9 silence frames don't close; the utterance keeps accumulating and
    // only the full 10-frame run ends it.
    let mut frames = vec![wake_frame()];
    frames.extend(repeat(speech(), 9));
    frames.extend(repeat(silence(), 9));
    frames.extend(repeat(speech(), 1));
    frames.extend(repeat(silence(), 10));

    let outcome = run_script(tight_config(), frames, vec![]);
    let utterances = outcome.utterances();
    assert_eq!(utterances.len(), 1);
    // Every LISTENING frame is in the blob: 1 + 9 + 9 + 1 + 10
    assert_eq!(decode_wav(utterances[0]).len(), 30 * FRAME_SAMPLES);
}

#[test]
fn conversation_resume_uses_conversation_timeout() {
    // After resume_conversation the machine listens without a wake word and
    // keeps listening past the wake timeout.
    let config = CaptureConfig {
        wake_listen_timeout_ms: 300, // 10 frames
        ..tight_config()
    };
    let control = CaptureControl::default();
    control.resume_conversation();

    let mut frames = repeat(silence(), 30); // well past the wake timeout
    frames.extend(repeat(speech(), 25));
    frames.extend(repeat(silence(), 10));

    let source = ScriptSource::new(frames, control.clone());
    let wake = MarkerWake {
        counters: WakeCounters::default(),
    };
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let mut machine = CaptureMachine::new(config, source, wake, EnergyVad, control, tx);
    machine.run(&AtomicBool::new(true));

    let mut utterances = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, CaptureEvent::Utterance(_)) {
            utterances += 1;
        }
    }
    // The turn completed and conversation mode keeps the machine listening.
    assert_eq!(utterances, 1);
    assert_eq!(machine.state(), CaptureState::Listening);
}
