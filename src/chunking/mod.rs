//! Sentence-based text splitting for `add_text`.
//!
//! Chunking proper is a collaborator, not part of the pipeline core; callers
//! with their own chunker can pre-chunk and use `add_chunks` directly.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitterError {
    #[error("content too short to split")]
    ContentTooShort,
}

#[async_trait]
pub trait ContentSplitter: Send + Sync {
    async fn split(&self, content: &str) -> Result<Vec<String>, SplitterError>;

    fn name(&self) -> &'static str;
}

/// Greedy sentence packer: sentences accumulate into a chunk until the token
/// estimate exceeds `chunk_size`, with at least `min_sentences` per chunk.
pub struct SentenceSplitter {
    chunk_size: usize,
    min_sentences: usize,
}

impl SentenceSplitter {
    pub fn new(chunk_size: usize, min_sentences: usize) -> Self {
        Self {
            chunk_size,
            min_sentences,
        }
    }

    // Rough sizing only: about four characters per token is close enough to
    // keep chunks inside an extraction prompt.
    fn estimate_tokens(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn split_sentences(text: &str) -> Vec<&str> {
        text.split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .collect()
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new(512, 2)
    }
}

#[async_trait]
impl ContentSplitter for SentenceSplitter {
    async fn split(&self, content: &str) -> Result<Vec<String>, SplitterError> {
        let sentences = Self::split_sentences(content);
        if sentences.is_empty() {
            return Err(SplitterError::ContentTooShort);
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;
        let mut sentence_count = 0;

        for sentence in sentences {
            let sentence_tokens = Self::estimate_tokens(sentence);

            if current_tokens + sentence_tokens > self.chunk_size
                && sentence_count >= self.min_sentences
            {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
                sentence_count = 0;
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            current_tokens += sentence_tokens;
            sentence_count += 1;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "SentenceSplitter"
    }
}
