//! graphloom — typed, weighted knowledge-graph construction from text.
//!
//! Documents are chunked, each chunk goes through one structured LLM
//! extraction pass, and the results are canonicalized, deduplicated and
//! persisted as a weighted graph behind the [`db::GraphDatabase`] contract.
//! Chunks fan out over a bounded worker pool with per-chunk error isolation.

pub mod benchmark;
pub mod chunking;
pub mod core;
pub mod db;
pub mod graph;
pub mod index;
pub mod llm;
pub mod testing;
pub mod utils;

pub use crate::core::config::{ConfigError, Feature, KnowledgeGraphConfig};
pub use crate::core::error::{GraphLoomError, Result};
pub use crate::db::memory::InMemoryGraph;
pub use crate::db::GraphDatabase;
pub use crate::graph::store::{GraphStore, GraphStoreError, RelationshipOutcome};
pub use crate::graph::types::{Extraction, Provenance, RelationshipType};
pub use crate::index::{Chunk, ChunkFailure, FailureKind, IndexSummary, KnowledgeGraphIndex};
pub use crate::llm::{
    EmbeddingProvider, KgExtractor, LlmProvider, OllamaEmbedder, OllamaProvider,
};
pub use crate::utils::{safe_truncate, safe_truncate_ellipsis};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub const DEFAULT_LLM_MODEL: &str = "llama3.1:8b";

pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

pub const DEFAULT_ENTITY_CACHE_SIZE: usize = 1000;
