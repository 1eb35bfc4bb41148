use thiserror::Error;

use crate::core::config::ConfigError;
use crate::db::StorageError;
use crate::graph::store::GraphStoreError;
use crate::llm::embeddings::EmbeddingError;
use crate::llm::extractor::ExtractionError;
use crate::llm::provider::LlmProviderError;

/// Top-level error for callers that do not care which layer failed.
///
/// Inside the pipeline, errors stay typed per module and are converted to
/// per-chunk failure records at the indexer boundary; only configuration
/// errors are fatal.
#[derive(Error, Debug)]
pub enum GraphLoomError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("graph store error: {0}")]
    Store(#[from] GraphStoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("LLM provider error: {0}")]
    LlmProvider(#[from] LlmProviderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphLoomError>;
