use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::sync::mpsc;
use voice_agent_rs::audio::{self, MicConfig, MicFrames};
use voice_agent_rs::capture::{spawn_capture, CaptureConfig, CaptureControl};
use voice_agent_rs::config;
use voice_agent_rs::daemon::Daemon;
use voice_agent_rs::error::AgentError;
use voice_agent_rs::vad::WebRtcSpeechDetector;
use voice_agent_rs::wakeword::{self, EngineConfig, WakeWordEngine};

#[derive(Parser)]
#[command(name = "voice-agent")]
#[command(about = "Always-on wake-word voice assistant daemon")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_devices {
        let (inputs, outputs) = audio::list_devices().context("listing audio devices")?;
        println!("Input devices:");
        for (i, name) in inputs.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        println!("Output devices:");
        for (i, name) in outputs.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        return Ok(());
    }

    let settings = config::load_settings().context("loading configuration")?;
    log::info!("Voice Assistant starting ...");

    let control = CaptureControl::default();
    let (event_tx, event_rx) = mpsc::channel(8);

    let capture_config = CaptureConfig {
        vad_silence_ms: settings.vad_silence_ms,
        vad_min_speech_ms: settings.vad_min_speech_ms,
        wake_listen_timeout_ms: settings.wake_listen_timeout_ms,
        conversation_timeout_ms: settings.conversation_timeout_ms,
    };
    let mic_config = MicConfig {
        device_index: settings.mic_device_index,
    };
    let engine_config = EngineConfig::from_settings(&settings);
    let vad_aggressiveness = settings.vad_aggressiveness;

    // The audio stack is built inside the capture thread; startup failures
    // (missing credentials or models, no usable device) surface here.
    let factory = move || -> std::result::Result<
        (MicFrames, Box<dyn WakeWordEngine>, WebRtcSpeechDetector),
        AgentError,
    > {
        let engine = wakeword::build_engine(engine_config)?;
        let vad = WebRtcSpeechDetector::new(vad_aggressiveness)?;
        let source = MicFrames::open(&mic_config)?;
        Ok((source, engine, vad))
    };
    let capture = spawn_capture(factory, capture_config, control.clone(), event_tx)
        .context("starting microphone capture")?;

    let daemon = Daemon::new(&settings, control).context("starting orchestrator")?;

    log::info!("Listening. Press Ctrl-C to stop.");
    tokio::select! {
        _ = daemon.run(event_rx) => {}
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received");
        }
    }

    capture.stop();
    log::info!("Voice Assistant stopped.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    // Tee to LOG_FILE when configured and writable; stderr-only otherwise.
    if let Ok(path) = std::env::var("LOG_FILE") {
        if !path.is_empty() {
            if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                builder.target(env_logger::Target::Pipe(Box::new(Tee {
                    file,
                    stderr: std::io::stderr(),
                })));
            }
        }
    }
    builder.init();
}

struct Tee {
    file: std::fs::File,
    stderr: std::io::Stderr,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stderr.write_all(buf)?;
        // A full disk must not take logging down with it.
        let _ = self.file.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.file.flush();
        self.stderr.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_tee_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let mut tee = Tee {
            file,
            stderr: std::io::stderr(),
        };
        tee.write_all(b"hello log\n").unwrap();
        tee.flush().unwrap();

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello log\n");
    }
}
