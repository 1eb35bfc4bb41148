//! Chunk-level indexing orchestrator: fan chunks out over a bounded worker
//! pool, extract, persist, and report per-chunk outcomes.
//!
//! Error isolation is the governing rule here: nothing a single chunk does —
//! oracle failure, storage error, deadline expiry, panic — may affect its
//! siblings or terminate the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::{ContentSplitter, SentenceSplitter, SplitterError};
use crate::core::config::{Feature, KnowledgeGraphConfig};
use crate::db::GraphDatabase;
use crate::graph::store::{GraphStore, GraphStoreError};
use crate::graph::types::Provenance;
use crate::llm::embeddings::EmbeddingProvider;
use crate::llm::extractor::KgExtractor;
use crate::llm::provider::LlmProvider;

const PROGRESS_EVERY: usize = 10;

/// Opaque text fragment with a stable identifier. Immutable inside the
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    Storage,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one `add_chunks` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSummary {
    pub succeeded: usize,
    /// Chunks whose relationships were already in the store.
    pub skipped: usize,
    pub failed: Vec<ChunkFailure>,
}

impl IndexSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// First `limit` failures per kind, in completion order.
    pub fn error_samples(&self, limit: usize) -> HashMap<FailureKind, Vec<&ChunkFailure>> {
        let mut samples: HashMap<FailureKind, Vec<&ChunkFailure>> = HashMap::new();
        for failure in &self.failed {
            let bucket = samples.entry(failure.kind).or_default();
            if bucket.len() < limit {
                bucket.push(failure);
            }
        }
        samples
    }

    fn record(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Succeeded => self.succeeded += 1,
            ChunkOutcome::Skipped => self.skipped += 1,
            ChunkOutcome::Failed(failure) => self.failed.push(failure),
        }
    }
}

#[derive(Debug)]
enum ChunkOutcome {
    Succeeded,
    Skipped,
    Failed(ChunkFailure),
}

/// Knowledge-graph construction pipeline over one knowledge base.
pub struct KnowledgeGraphIndex<D, E, P>
where
    D: GraphDatabase + 'static,
    E: EmbeddingProvider + 'static,
    P: LlmProvider + 'static,
{
    config: KnowledgeGraphConfig,
    extractor: Arc<KgExtractor<P>>,
    store: Arc<GraphStore<D, E>>,
    splitter: Arc<dyn ContentSplitter>,
    cancel: CancellationToken,
}

impl<D, E, P> KnowledgeGraphIndex<D, E, P>
where
    D: GraphDatabase + 'static,
    E: EmbeddingProvider + 'static,
    P: LlmProvider + 'static,
{
    pub fn new(db: D, embedder: E, provider: P, config: KnowledgeGraphConfig) -> Self {
        let extractor = Arc::new(KgExtractor::new(provider, config.clone()));
        let store = Arc::new(GraphStore::new(db, embedder, config.clone()));

        info!(
            "KnowledgeGraphIndex initialized (parallel={}, workers={}, timeout={}s)",
            config.is_feature_enabled(Feature::ParallelProcessing),
            config.worker_count(),
            config.chunk_timeout_seconds
        );

        Self {
            config,
            extractor,
            store,
            splitter: Arc::new(SentenceSplitter::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn ContentSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn store(&self) -> &GraphStore<D, E> {
        &self.store
    }

    pub fn extractor(&self) -> &KgExtractor<P> {
        &self.extractor
    }

    /// Preload the entity cache from the database. Worth calling once when
    /// resuming an already-populated knowledge base.
    pub async fn warm_cache(&self) -> Result<usize, GraphStoreError> {
        self.store.warm_cache().await
    }

    /// Request shutdown: workers stop pulling new chunks, in-flight chunks
    /// run to completion within their own deadline, and `add_chunks` returns
    /// a partial summary with the rest marked `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Split a document with the configured splitter, then index the chunks.
    pub async fn add_text(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<IndexSummary, SplitterError> {
        let pieces = self.splitter.split(text).await?;
        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: format!("{}-{:04}", document_id, i),
                text,
            })
            .collect();
        Ok(self.add_chunks(document_id, chunks).await)
    }

    /// Index a batch of chunks, in parallel when the feature is on.
    pub async fn add_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> IndexSummary {
        if chunks.is_empty() {
            return IndexSummary::default();
        }

        let total = chunks.len();
        let parallel =
            self.config.is_feature_enabled(Feature::ParallelProcessing) && chunks.len() > 1;
        info!(
            "processing {} chunks from {} ({})",
            total,
            document_id,
            if parallel { "parallel" } else { "sequential" }
        );

        let summary = if parallel {
            self.process_parallel(document_id, chunks).await
        } else {
            self.process_sequential(document_id, chunks).await
        };

        info!(
            "document {} indexed: {} succeeded, {} skipped, {} failed",
            document_id,
            summary.succeeded,
            summary.skipped,
            summary.failed.len()
        );
        summary
    }

    async fn process_sequential(&self, document_id: &str, chunks: Vec<Chunk>) -> IndexSummary {
        let deadline = Duration::from_secs(self.config.chunk_timeout_seconds);
        let total = chunks.len();
        let mut summary = IndexSummary::default();

        for (i, chunk) in chunks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.failed.push(ChunkFailure {
                    chunk_id: chunk.id,
                    kind: FailureKind::Cancelled,
                    message: "cancelled before start".to_string(),
                });
                continue;
            }

            let outcome = process_chunk(
                self.extractor.clone(),
                self.store.clone(),
                self.cancel.clone(),
                deadline,
                document_id.to_string(),
                chunk,
            )
            .await;
            summary.record(outcome);

            if (i + 1) % PROGRESS_EVERY == 0 {
                info!("chunk processing progress: {}/{}", i + 1, total);
            }
        }

        summary
    }

    async fn process_parallel(&self, document_id: &str, chunks: Vec<Chunk>) -> IndexSummary {
        let deadline = Duration::from_secs(self.config.chunk_timeout_seconds);
        let total = chunks.len();
        let workers = self.config.worker_count().min(total).max(1);
        let queue_capacity = (2 * self.config.worker_count()).max(1);

        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(queue_capacity);
        let chunk_rx = Arc::new(tokio::sync::Mutex::new(chunk_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ChunkOutcome>();

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let chunk_rx = chunk_rx.clone();
            let result_tx = result_tx.clone();
            let extractor = self.extractor.clone();
            let store = self.store.clone();
            let cancel = self.cancel.clone();
            let document_id = document_id.to_string();

            pool.spawn(async move {
                loop {
                    // An already-requested cancellation must win outright;
                    // select! would race it against a ready recv().
                    if cancel.is_cancelled() {
                        break;
                    }

                    let chunk = {
                        let mut rx = chunk_rx.lock().await;
                        if cancel.is_cancelled() {
                            None
                        } else {
                            tokio::select! {
                                _ = cancel.cancelled() => None,
                                received = rx.recv() => received,
                            }
                        }
                    };
                    let Some(chunk) = chunk else { break };

                    let outcome = process_chunk(
                        extractor.clone(),
                        store.clone(),
                        cancel.clone(),
                        deadline,
                        document_id.clone(),
                        chunk,
                    )
                    .await;
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("worker {} stopped", worker);
            });
        }
        drop(result_tx);

        let mut summary = IndexSummary::default();

        // Single producer; the bounded queue exerts back-pressure.
        let mut pending = chunks.into_iter();
        let mut undispatched: Vec<Chunk> = Vec::new();
        for chunk in pending.by_ref() {
            // Checked synchronously: a cancellation that is already in
            // effect must stop dispatch deterministically, not race a
            // same-tick-ready reserve() inside select!.
            if self.cancel.is_cancelled() {
                undispatched.push(chunk);
                break;
            }

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => None,
                permit = chunk_tx.reserve() => permit.ok(),
            };
            match permit {
                Some(permit) => permit.send(chunk),
                None => {
                    undispatched.push(chunk);
                    break;
                }
            }
        }
        undispatched.extend(pending);
        drop(chunk_tx);

        for chunk in undispatched {
            summary.failed.push(ChunkFailure {
                chunk_id: chunk.id,
                kind: FailureKind::Cancelled,
                message: "cancelled before dispatch".to_string(),
            });
        }

        let mut completed = 0usize;
        while let Some(outcome) = result_rx.recv().await {
            completed += 1;
            summary.record(outcome);
            if completed % PROGRESS_EVERY == 0 {
                info!("chunk processing progress: {}/{}", completed, total);
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("worker task failed: {}", e);
            }
        }

        // Chunks still sitting in the queue when the workers stopped.
        let mut rx = chunk_rx.lock().await;
        while let Ok(chunk) = rx.try_recv() {
            summary.failed.push(ChunkFailure {
                chunk_id: chunk.id,
                kind: FailureKind::Cancelled,
                message: "cancelled in queue".to_string(),
            });
        }

        summary
    }
}

async fn process_chunk<D, E, P>(
    extractor: Arc<KgExtractor<P>>,
    store: Arc<GraphStore<D, E>>,
    cancel: CancellationToken,
    deadline: Duration,
    document_id: String,
    chunk: Chunk,
) -> ChunkOutcome
where
    D: GraphDatabase + 'static,
    E: EmbeddingProvider + 'static,
    P: LlmProvider + 'static,
{
    let chunk_id = chunk.id.clone();

    if cancel.is_cancelled() {
        return ChunkOutcome::Failed(ChunkFailure {
            chunk_id,
            kind: FailureKind::Cancelled,
            message: "cancelled before start".to_string(),
        });
    }

    match store.chunk_already_indexed(&chunk.id).await {
        Ok(true) => {
            debug!("chunk {} already indexed, skipping", chunk.id);
            return ChunkOutcome::Skipped;
        }
        Ok(false) => {}
        Err(e) => {
            return ChunkOutcome::Failed(ChunkFailure {
                chunk_id,
                kind: FailureKind::Storage,
                message: e.to_string(),
            })
        }
    }

    // The chunk's work runs on its own task so a deadline expiry abandons it
    // rather than aborting mid-write: a timed-out chunk is never left
    // half-persisted.
    let work = tokio::spawn(async move {
        let provenance = Provenance {
            document_id,
            chunk_id: chunk.id.clone(),
        };

        let extraction = extractor.extract(&chunk.text).await.map_err(|e| ChunkFailure {
            chunk_id: chunk.id.clone(),
            kind: FailureKind::Extraction,
            message: e.to_string(),
        })?;

        if cancel.is_cancelled() {
            return Err(ChunkFailure {
                chunk_id: chunk.id.clone(),
                kind: FailureKind::Cancelled,
                message: "cancelled before persistence".to_string(),
            });
        }

        store.add(&extraction, &provenance).await.map_err(|e| ChunkFailure {
            chunk_id: chunk.id.clone(),
            kind: FailureKind::Storage,
            message: e.to_string(),
        })?;

        Ok::<(), ChunkFailure>(())
    });

    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(Ok(()))) => ChunkOutcome::Succeeded,
        Ok(Ok(Err(failure))) => ChunkOutcome::Failed(failure),
        Ok(Err(join_error)) => ChunkOutcome::Failed(ChunkFailure {
            chunk_id,
            kind: FailureKind::Internal,
            message: format!("chunk task panicked: {join_error}"),
        }),
        Err(_) => {
            warn!(
                "chunk {} exceeded {}s deadline, abandoned",
                chunk_id,
                deadline.as_secs()
            );
            ChunkOutcome::Failed(ChunkFailure {
                chunk_id,
                kind: FailureKind::Timeout,
                message: format!("exceeded {}s deadline", deadline.as_secs()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: &str, kind: FailureKind) -> ChunkFailure {
        ChunkFailure {
            chunk_id: id.to_string(),
            kind,
            message: String::new(),
        }
    }

    #[test]
    fn summary_accounting() {
        let mut summary = IndexSummary::default();
        summary.record(ChunkOutcome::Succeeded);
        summary.record(ChunkOutcome::Skipped);
        summary.record(ChunkOutcome::Failed(failure("c1", FailureKind::Timeout)));

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn error_samples_caps_per_kind() {
        let mut summary = IndexSummary::default();
        for i in 0..5 {
            summary
                .failed
                .push(failure(&format!("e{i}"), FailureKind::Extraction));
        }
        summary.failed.push(failure("t0", FailureKind::Timeout));

        let samples = summary.error_samples(3);
        assert_eq!(samples[&FailureKind::Extraction].len(), 3);
        assert_eq!(samples[&FailureKind::Extraction][0].chunk_id, "e0");
        assert_eq!(samples[&FailureKind::Timeout].len(), 1);
        assert!(!samples.contains_key(&FailureKind::Cancelled));
    }

    #[test]
    fn failure_kind_labels_are_snake_case() {
        assert_eq!(FailureKind::Extraction.to_string(), "extraction");
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
        assert_eq!(FailureKind::Cancelled.to_string(), "cancelled");
    }
}
