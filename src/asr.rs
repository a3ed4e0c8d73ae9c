//! Speech-to-text client.

use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AsrError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected response shape (no \"text\" field)")]
    MalformedResponse,
    #[error("Empty transcript")]
    EmptyTranscript,
}

/// Sends a WAV buffer to the ASR service and returns the transcribed text.
pub struct AsrClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AsrClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AsrError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/asr", base_url.trim_end_matches('/')),
        })
    }

    pub async fn transcribe(&self, wav: &[u8]) -> Result<String, AsrError> {
        let b64 = general_purpose::STANDARD.encode(wav);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "wav_base64": b64 }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                log::error!("ASR response has no \"text\" field: {}", body);
                AsrError::MalformedResponse
            })?
            .trim()
            .to_string();

        log::debug!("ASR result: {:?}", text);
        if text.is_empty() {
            return Err(AsrError::EmptyTranscript);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        // Nothing listens on this port; the request must fail, not hang.
        let client = AsrClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = client.transcribe(b"not-a-wav").await;
        assert!(matches!(result, Err(AsrError::Request(_))));
    }

    #[test]
    fn test_endpoint_path() {
        let client = AsrClient::new("http://host:8005/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint, "http://host:8005/asr");
    }
}
