pub mod memory;
pub mod migrations;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::types::RelationshipType;
use migrations::Migration;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unique constraint {constraint} violated for {key}")]
    UniqueViolation { constraint: &'static str, key: String },

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted entity row. One row per canonical id within a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    /// First surface form seen; frozen after creation.
    pub display_name: String,
    pub normalized_name: String,
    pub canonical_id: String,
    pub description: String,
    pub embedding: Vec<f32>,
    pub aliases: Vec<String>,
    pub covariates: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new_id() -> String {
        let hex: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(12)
            .collect();
        format!("ent_{}", hex)
    }
}

/// Persisted relationship row, unique on (source, target, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    pub weight: f64,
    pub description: String,
    pub document_id: String,
    pub chunk_id: String,
    /// Type label exactly as the LLM produced it.
    pub raw_type: String,
    pub created_at: DateTime<Utc>,
}

impl RelationshipRecord {
    pub fn new_id() -> String {
        let hex: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(12)
            .collect();
        format!("rel_{}", hex)
    }
}

/// Top-1 vector search result.
#[derive(Debug, Clone)]
pub struct SimilarEntity {
    pub entity: EntityRecord,
    pub similarity: f64,
}

/// Storage contract for one knowledge base.
///
/// The engine behind it is expected to provide unique constraints on
/// `canonical_id` and on the `(source, target, type)` triple, vector top-1
/// similarity search, and an outgoing-edge count; everything else the
/// pipeline builds on top.
#[async_trait]
pub trait GraphDatabase: Send + Sync {
    /// Insert a new entity. Returns `UniqueViolation` when another writer won
    /// the canonical-id race; callers re-read the winner.
    async fn insert_entity(&self, record: EntityRecord) -> Result<(), StorageError>;

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StorageError>;

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<EntityRecord>, StorageError>;

    /// Nearest stored entity by cosine similarity, or `None` on an empty
    /// knowledge base.
    async fn nearest_entity(&self, embedding: &[f32]) -> Result<Option<SimilarEntity>, StorageError>;

    /// Replace the mutable metadata (aliases, covariates) of an entity.
    async fn update_entity_metadata(
        &self,
        id: &str,
        aliases: Vec<String>,
        covariates: HashMap<String, serde_json::Value>,
    ) -> Result<(), StorageError>;

    /// Idempotent insert: returns `false` when the (source, target, type)
    /// triple already exists.
    async fn insert_relationship(&self, record: RelationshipRecord) -> Result<bool, StorageError>;

    async fn count_outgoing(&self, source_id: &str) -> Result<usize, StorageError>;

    /// Number of relationships recorded against a chunk id, used for the
    /// already-indexed skip check.
    async fn count_relationships_for_chunk(&self, chunk_id: &str) -> Result<usize, StorageError>;

    async fn entity_count(&self) -> Result<usize, StorageError>;

    async fn relationship_count(&self) -> Result<usize, StorageError>;

    /// Full scans for the benchmark reporter; never on the hot path.
    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StorageError>;

    async fn list_relationships(&self) -> Result<Vec<RelationshipRecord>, StorageError>;

    /// Most recently created entities, newest first; feeds cache warmup.
    async fn recent_entities(&self, limit: usize) -> Result<Vec<EntityRecord>, StorageError>;

    /// Apply an additive migration. Returns `false` when the version was
    /// already applied.
    async fn apply_migration(&self, migration: &Migration) -> Result<bool, StorageError>;

    async fn applied_migrations(&self) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
impl<D: GraphDatabase + ?Sized> GraphDatabase for Arc<D> {
    async fn insert_entity(&self, record: EntityRecord) -> Result<(), StorageError> {
        (**self).insert_entity(record).await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StorageError> {
        (**self).get_entity(id).await
    }

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<EntityRecord>, StorageError> {
        (**self).get_entity_by_canonical_id(canonical_id).await
    }

    async fn nearest_entity(&self, embedding: &[f32]) -> Result<Option<SimilarEntity>, StorageError> {
        (**self).nearest_entity(embedding).await
    }

    async fn update_entity_metadata(
        &self,
        id: &str,
        aliases: Vec<String>,
        covariates: HashMap<String, serde_json::Value>,
    ) -> Result<(), StorageError> {
        (**self).update_entity_metadata(id, aliases, covariates).await
    }

    async fn insert_relationship(&self, record: RelationshipRecord) -> Result<bool, StorageError> {
        (**self).insert_relationship(record).await
    }

    async fn count_outgoing(&self, source_id: &str) -> Result<usize, StorageError> {
        (**self).count_outgoing(source_id).await
    }

    async fn count_relationships_for_chunk(&self, chunk_id: &str) -> Result<usize, StorageError> {
        (**self).count_relationships_for_chunk(chunk_id).await
    }

    async fn entity_count(&self) -> Result<usize, StorageError> {
        (**self).entity_count().await
    }

    async fn relationship_count(&self) -> Result<usize, StorageError> {
        (**self).relationship_count().await
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StorageError> {
        (**self).list_entities().await
    }

    async fn list_relationships(&self) -> Result<Vec<RelationshipRecord>, StorageError> {
        (**self).list_relationships().await
    }

    async fn recent_entities(&self, limit: usize) -> Result<Vec<EntityRecord>, StorageError> {
        (**self).recent_entities(limit).await
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<bool, StorageError> {
        (**self).apply_migration(migration).await
    }

    async fn applied_migrations(&self) -> Result<Vec<String>, StorageError> {
        (**self).applied_migrations().await
    }
}

/// Cosine similarity over f32 vectors, widened to f64 for comparisons
/// against the merge threshold.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)) as f64
}
