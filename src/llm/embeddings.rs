use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::utils::safe_truncate;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("empty text")]
    EmptyText,
}

/// The embedding oracle: text in, fixed-dimension vector out.
///
/// The dimension is a deployment constant carried by the implementation; the
/// pipeline never hard-codes it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model_name(&self) -> &str;
}

#[async_trait]
impl EmbeddingProvider for Arc<dyn EmbeddingProvider> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama-backed embedding oracle.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        let base_url = base_url.into();
        let model = model.into();
        info!("OllamaEmbedder initialized (model={}, url={})", model, base_url);
        Self {
            base_url,
            model,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    pub fn localhost(model: impl Into<String>) -> Self {
        Self::new(crate::DEFAULT_OLLAMA_URL, model, 120)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        debug!("embedding text: {}", safe_truncate(text, 50));

        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(EmbeddingError::Http)?
            .json::<OllamaEmbeddingResponse>()
            .await?;

        if response.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "no embedding in response".to_string(),
            ));
        }

        Ok(response.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
