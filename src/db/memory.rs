//! In-memory `GraphDatabase` used by tests and the benchmark reporter.
//!
//! Mirrors the engine contract the pipeline relies on: unique constraints on
//! canonical id and on the relationship triple, brute-force cosine top-1, and
//! outgoing-edge counts. One instance is one knowledge base.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    cosine_similarity, EntityRecord, GraphDatabase, RelationshipRecord, SimilarEntity,
    StorageError,
};
use crate::db::migrations::Migration;
use crate::graph::types::RelationshipType;

#[derive(Default)]
struct Inner {
    entities: HashMap<String, EntityRecord>,
    canonical_index: HashMap<String, String>,
    relationships: HashMap<(String, String, RelationshipType), RelationshipRecord>,
    outgoing: HashMap<String, usize>,
    chunk_counts: HashMap<String, usize>,
    insertion_order: Vec<String>,
    applied: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryGraph {
    inner: RwLock<Inner>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphDatabase for InMemoryGraph {
    async fn insert_entity(&self, record: EntityRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write();

        if inner.canonical_index.contains_key(&record.canonical_id) {
            return Err(StorageError::UniqueViolation {
                constraint: "entities.canonical_id",
                key: record.canonical_id,
            });
        }

        inner
            .canonical_index
            .insert(record.canonical_id.clone(), record.id.clone());
        inner.insertion_order.push(record.id.clone());
        inner.entities.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StorageError> {
        Ok(self.inner.read().entities.get(id).cloned())
    }

    async fn get_entity_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<EntityRecord>, StorageError> {
        let inner = self.inner.read();
        Ok(inner
            .canonical_index
            .get(canonical_id)
            .and_then(|id| inner.entities.get(id))
            .cloned())
    }

    async fn nearest_entity(&self, embedding: &[f32]) -> Result<Option<SimilarEntity>, StorageError> {
        let inner = self.inner.read();

        let mut best: Option<SimilarEntity> = None;
        for entity in inner.entities.values() {
            let similarity = cosine_similarity(embedding, &entity.embedding);
            let better = match &best {
                Some(current) => similarity > current.similarity,
                None => true,
            };
            if better {
                best = Some(SimilarEntity {
                    entity: entity.clone(),
                    similarity,
                });
            }
        }

        Ok(best)
    }

    async fn update_entity_metadata(
        &self,
        id: &str,
        aliases: Vec<String>,
        covariates: HashMap<String, serde_json::Value>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let entity = inner
            .entities
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        entity.aliases = aliases;
        entity.covariates = covariates;
        Ok(())
    }

    async fn insert_relationship(&self, record: RelationshipRecord) -> Result<bool, StorageError> {
        let mut inner = self.inner.write();

        if !inner.entities.contains_key(&record.source_id) {
            return Err(StorageError::Query(format!(
                "unknown source entity {}",
                record.source_id
            )));
        }
        if !inner.entities.contains_key(&record.target_id) {
            return Err(StorageError::Query(format!(
                "unknown target entity {}",
                record.target_id
            )));
        }

        let key = (
            record.source_id.clone(),
            record.target_id.clone(),
            record.rel_type,
        );
        if inner.relationships.contains_key(&key) {
            return Ok(false);
        }

        *inner.outgoing.entry(record.source_id.clone()).or_default() += 1;
        *inner.chunk_counts.entry(record.chunk_id.clone()).or_default() += 1;
        inner.relationships.insert(key, record);
        Ok(true)
    }

    async fn count_outgoing(&self, source_id: &str) -> Result<usize, StorageError> {
        Ok(self
            .inner
            .read()
            .outgoing
            .get(source_id)
            .copied()
            .unwrap_or(0))
    }

    async fn count_relationships_for_chunk(&self, chunk_id: &str) -> Result<usize, StorageError> {
        Ok(self
            .inner
            .read()
            .chunk_counts
            .get(chunk_id)
            .copied()
            .unwrap_or(0))
    }

    async fn entity_count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.read().entities.len())
    }

    async fn relationship_count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.read().relationships.len())
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StorageError> {
        let inner = self.inner.read();
        Ok(inner
            .insertion_order
            .iter()
            .filter_map(|id| inner.entities.get(id))
            .cloned()
            .collect())
    }

    async fn list_relationships(&self) -> Result<Vec<RelationshipRecord>, StorageError> {
        Ok(self.inner.read().relationships.values().cloned().collect())
    }

    async fn recent_entities(&self, limit: usize) -> Result<Vec<EntityRecord>, StorageError> {
        let inner = self.inner.read();
        Ok(inner
            .insertion_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.entities.get(id))
            .cloned()
            .collect())
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<bool, StorageError> {
        let mut inner = self.inner.write();
        if inner.applied.iter().any(|v| v == migration.version) {
            return Ok(false);
        }
        inner.applied.push(migration.version.to_string());
        Ok(true)
    }

    async fn applied_migrations(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.inner.read().applied.clone())
    }
}
