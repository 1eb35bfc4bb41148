//! Fake oracles for unit and integration tests.
//!
//! The pipeline treats the LLM and embedding services as contracts, so tests
//! drive it with deterministic stand-ins instead of network clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llm::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::llm::provider::{LlmMetadata, LlmProvider, LlmProviderError};

const EMPTY_GRAPH: &str = r#"{"entities": [], "relationships": []}"#;

/// Scripted LLM oracle: responses are selected by substring match against the
/// user prompt, with optional injected failures and latency.
#[derive(Default)]
pub struct StubLlm {
    responses: Vec<(String, String)>,
    failures: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl StubLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `response` for prompts containing `pattern`. First match wins.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), response.into()));
        self
    }

    /// Fail every call whose prompt contains `pattern`.
    pub fn with_failure(mut self, pattern: impl Into<String>) -> Self {
        self.failures.push(pattern.into());
        self
    }

    /// Sleep before answering, for deadline tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    async fn generate(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _response_format: Option<&str>,
    ) -> Result<(String, LlmMetadata), LlmProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.iter().any(|p| user_prompt.contains(p)) {
            return Err(LlmProviderError::Provider("injected failure".to_string()));
        }

        let content = self
            .responses
            .iter()
            .find(|(pattern, _)| user_prompt.contains(pattern))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| EMPTY_GRAPH.to_string());

        Ok((content, LlmMetadata::default()))
    }

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

const EMBEDDING_DIMS: usize = 1024;

/// Deterministic embedder keyed on the first whitespace token of the input:
/// same token maps to the same one-hot vector (cosine 1.0), different tokens
/// map to orthogonal vectors (cosine 0.0). That makes merge behavior fully
/// controllable from entity names alone. Keys are case-sensitive, so legacy
/// runs (which embed raw surface forms) keep "ICU" and "icu" apart while
/// enhanced runs (which embed normalized names) see them as identical.
#[derive(Default)]
pub struct FirstTokenEmbedder {
    assignments: Mutex<HashMap<String, usize>>,
}

impl FirstTokenEmbedder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingProvider for FirstTokenEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let token = text.split_whitespace().next().unwrap_or_default().to_string();

        let index = {
            let mut assignments = self.assignments.lock();
            let next = assignments.len();
            *assignments.entry(token).or_insert(next) % EMBEDDING_DIMS
        };

        let mut vector = vec![0.0; EMBEDDING_DIMS];
        vector[index] = 1.0;
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "first-token"
    }
}
