pub mod embeddings;
pub mod extractor;
pub mod ollama;
pub mod provider;

pub use embeddings::{EmbeddingError, EmbeddingProvider, OllamaEmbedder};
pub use extractor::{ExtractionError, KgExtractor};
pub use ollama::OllamaProvider;
pub use provider::{LlmMetadata, LlmProvider, LlmProviderError};
