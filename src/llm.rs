//! OpenAI-compatible chat completion client.
//!
//! Maintains the full conversation history behind a mutex. A successful turn
//! appends the user and assistant entries together; a failed turn leaves the
//! history untouched. `reset()` clears it.

use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected response shape: {0}")]
    MalformedResponse(String),
    #[error("Empty reply")]
    EmptyReply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

pub struct ChatConfig {
    pub base_url: String,
    pub api_key: SecretBox<String>,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub timeout: Duration,
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    config: ChatConfig,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            http,
            endpoint,
            config,
            history: Mutex::new(Vec::new()),
        })
    }

    pub async fn chat(&self, user_text: &str) -> Result<String, LlmError> {
        let mut messages = vec![ChatMessage::system(&self.config.system_prompt)];
        messages.extend(self.lock_history().iter().cloned());
        messages.push(ChatMessage::user(user_text));

        let payload = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let reply = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                log::error!("Chat response missing choices[0].message.content");
                LlmError::MalformedResponse("missing choices[0].message.content".to_string())
            })?
            .trim()
            .to_string();

        if reply.is_empty() {
            return Err(LlmError::EmptyReply);
        }

        // Commit the turn as one unit so the history never holds a user
        // message without its reply.
        {
            let mut history = self.lock_history();
            history.push(ChatMessage::user(user_text));
            history.push(ChatMessage::assistant(&reply));
        }
        log::debug!("Chat reply: {:?}", reply);
        Ok(reply)
    }

    /// Clear the conversation history.
    pub fn reset(&self) {
        self.lock_history().clear();
        log::info!("Conversation history cleared");
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<ChatMessage>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(base_url: &str) -> ChatClient {
        ChatClient::new(ChatConfig {
            base_url: base_url.to_string(),
            api_key: SecretBox::new(Box::new("nokey".to_string())),
            model: "llama3".to_string(),
            max_tokens: 150,
            system_prompt: "You are a test assistant.".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_unchanged() {
        // Nothing listens on this port; the call fails fast.
        let client = test_client("http://127.0.0.1:9/v1");
        assert_eq!(client.history_len(), 0);
        let result = client.chat("hello").await;
        assert!(result.is_err());
        assert_eq!(client.history_len(), 0);
    }

    #[test]
    fn test_reset_clears_history() {
        let client = test_client("http://127.0.0.1:9/v1");
        client.lock_history().push(ChatMessage::user("a"));
        client.lock_history().push(ChatMessage::assistant("b"));
        client.reset();
        assert_eq!(client.history_len(), 0);
    }

    #[test]
    fn test_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }
}
