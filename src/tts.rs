//! Text-to-speech client.
//!
//! Non-streaming synthesis returns a complete WAV; streaming synthesis
//! returns a lazy sequence of raw 44.1 kHz mono 16-bit PCM chunks that the
//! playback engine consumes with no knowledge of HTTP.

use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connect budget for the streaming request.
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-chunk read budget once the stream is open.
const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Chunks buffered between the HTTP task and the playback worker.
const STREAM_CHANNEL_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("No response within the read budget")]
    Timeout,
    #[error("Empty audio returned")]
    EmptyAudio,
}

pub struct TtsClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    endpoint: String,
    voice: String,
    default_timeout: Duration,
}

/// Lazy finite PCM chunk sequence produced by a streaming synthesis call.
/// Iteration blocks on the next chunk; intended for use off the async
/// runtime (the playback worker).
pub struct PcmChunks {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Iterator for PcmChunks {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.blocking_recv()
    }
}

impl TtsClient {
    pub fn new(base_url: &str, voice: &str, timeout: Duration) -> Result<Self, TtsError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            stream_http,
            endpoint: format!("{}/generate", base_url.trim_end_matches('/')),
            voice: voice.to_string(),
            default_timeout: timeout,
        })
    }

    /// Synthesize to a complete WAV. `timeout` overrides the client default
    /// (the wake acknowledgement uses a short budget).
    pub async fn synthesize(
        &self,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TtsError> {
        let payload = json!({
            "target_text": text,
            "voice_type": self.voice,
            "stream": false,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let audio = response.bytes().await?;
        log::debug!("TTS received {} bytes", audio.len());
        if audio.is_empty() {
            return Err(TtsError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }

    /// Synthesize as a stream of raw PCM chunks. The wait for response
    /// headers is bounded by the read budget (a per-request `timeout()`
    /// would also cap the body, cutting off replies longer than it); the
    /// body is then forwarded chunk by chunk into a bounded channel, and a
    /// read that stalls past the per-chunk budget ends the sequence early
    /// (the playback watchdog handles the rest).
    pub async fn synthesize_stream(&self, text: &str) -> Result<PcmChunks, TtsError> {
        let payload = json!({
            "target_text": text,
            "voice_type": self.voice,
            "stream": true,
        });
        let request = self.stream_http.post(&self.endpoint).json(&payload);
        let response = match tokio::time::timeout(STREAM_READ_TIMEOUT, request.send()).await {
            Ok(result) => result?.error_for_status()?,
            Err(_) => {
                log::warn!(
                    "TTS stream: no response within {}s; aborting",
                    STREAM_READ_TIMEOUT.as_secs()
                );
                return Err(TtsError::Timeout);
            }
        };

        let (tx, rx) = mpsc::channel::<Vec<u8>>(STREAM_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut total = 0usize;
            loop {
                match tokio::time::timeout(STREAM_READ_TIMEOUT, stream.next()).await {
                    Ok(Some(Ok(bytes))) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        total += bytes.len();
                        if tx.send(bytes.to_vec()).await.is_err() {
                            log::debug!("TTS stream consumer gone; stopping");
                            break;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        log::warn!("TTS stream error after {} bytes: {}", total, e);
                        break;
                    }
                    Ok(None) => {
                        log::debug!("TTS stream complete ({} bytes)", total);
                        break;
                    }
                    Err(_) => {
                        log::warn!(
                            "TTS stream read timed out after {} bytes; aborting",
                            total
                        );
                        break;
                    }
                }
            }
        });

        Ok(PcmChunks { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_chunks_drains_channel_in_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(vec![1u8, 2]).unwrap();
        tx.blocking_send(vec![3u8]).unwrap();
        drop(tx);

        let chunks: Vec<Vec<u8>> = PcmChunks { rx }.collect();
        assert_eq!(chunks, vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let client =
            TtsClient::new("http://127.0.0.1:9", "default", Duration::from_millis(500)).unwrap();
        assert!(client.synthesize("hello", None).await.is_err());
    }
}
