//! Embedding client abstraction and the OpenAI-compatible adapter.
//!
//! The adapter posts batches to `{base}/embeddings` and returns vectors in input order, using the
//! `index` field of each result rather than trusting response ordering.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Request never produced a response (connection failure, timeout, decode error).
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered with a non-success status.
    #[error("Embedding provider returned {status}: {body}")]
    UnexpectedStatus {
        /// Status code returned by the provider.
        status: StatusCode,
        /// Response body, kept for logs only.
        body: String,
    },
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Identifier of the embedding model, recorded alongside persisted indexes.
    fn model(&self) -> &str;
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Build a client from configuration, applying the upstream timeout to every request.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("docqa/", env!("CARGO_PKG_VERSION"), " embeddings"))
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.embedding_model_name.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        tracing::debug!(model = %self.model, inputs = expected, "Requesting embeddings");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, model = %self.model, "Embedding request rejected");
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let mut body: EmbeddingResponse = response.json().await?;
        if body.data.len() != expected {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected {expected} embeddings, received {}",
                body.data.len()
            )));
        }

        body.data.sort_by_key(|datum| datum.index);
        Ok(body.data.into_iter().map(|datum| datum.embedding).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
