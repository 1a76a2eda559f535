//! Chat-completion clients used to phrase answers.
//!
//! Both supported providers speak the OpenAI `/chat/completions` protocol, so a single adapter
//! serves them; Groq differs only in base URL, model, and a pool of API keys that is rotated
//! round-robin per request.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{CompletionProvider, Config};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Request never produced a response (connection failure, timeout, decode error).
    #[error("Completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered with a non-success status.
    #[error("Completion provider returned {status}: {body}")]
    UnexpectedStatus {
        /// Status code returned by the provider.
        status: StatusCode,
        /// Response body, kept for logs only.
        body: String,
    },
    /// Provider response did not contain a message.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by answer-generating chat models.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` as a single user message and return the reply text.
    async fn complete(&self, prompt: String) -> Result<String, CompletionClientError>;

    /// Identifier of the chat model.
    fn model(&self) -> &str;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionClient {
    http: Client,
    base_url: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
    model: String,
}

impl ChatCompletionClient {
    /// Build a client for `base_url`, rotating through `api_keys` on each request.
    ///
    /// An empty key list sends requests without an `Authorization` header.
    pub fn new(
        base_url: impl Into<String>,
        api_keys: Vec<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("docqa/", env!("CARGO_PKG_VERSION"), " completions"))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_keys,
            next_key: AtomicUsize::new(0),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn select_key(&self) -> Option<&str> {
        if self.api_keys.is_empty() {
            return None;
        }
        let slot = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        Some(&self.api_keys[slot])
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, prompt: String) -> Result<String, CompletionClientError> {
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0,
        });

        let mut request = self.http.post(self.endpoint()).json(&payload);
        if let Some(key) = self.select_key() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, model = %self.model, "Completion request rejected");
            return Err(CompletionClientError::UnexpectedStatus { status, body });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CompletionClientError::InvalidResponse("response has no choices".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the completion client selected by `QA_PROVIDER`.
pub fn build_completion_client(config: &Config) -> Result<ChatCompletionClient, reqwest::Error> {
    match config.qa_provider {
        CompletionProvider::OpenAI => ChatCompletionClient::new(
            config.openai_base_url.clone(),
            vec![config.openai_api_key.clone()],
            config.qa_model_name.clone(),
            config.upstream_timeout,
        ),
        CompletionProvider::Groq => ChatCompletionClient::new(
            config.groq_base_url.clone(),
            config.groq_api_keys.clone(),
            config.groq_model_name.clone(),
            config.upstream_timeout,
        ),
    }
}
