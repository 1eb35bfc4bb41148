use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::{Feature, KnowledgeGraphConfig};
use crate::db::{EntityRecord, GraphDatabase, RelationshipRecord, StorageError};
use crate::graph::cache::{CacheStats, CachedEntity, EntityCache};
use crate::graph::normalize::{canonical_id, embedding_input, normalize_name};
use crate::graph::types::{
    relationship_weight, Extraction, Provenance, RelationshipType,
};
use crate::llm::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::utils::safe_truncate;

const LOCK_STRIPES: usize = 64;

#[derive(Error, Debug)]
pub enum GraphStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// What happened to one relationship insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipOutcome {
    Created,
    /// The (source, target, type) triple already existed.
    Duplicate,
    /// Rejected because the source already carries `max_edges_per_entity`
    /// outgoing edges. Logged, non-fatal.
    DegreeCapped,
}

/// Monotonic operation counters, snapshotted for the benchmark reporter.
#[derive(Debug, Default, Clone)]
pub struct StoreCounters {
    pub entities_created: u64,
    pub entities_merged: u64,
    pub relationships_created: u64,
    pub symmetric_created: u64,
    pub duplicates_suppressed: u64,
    pub degree_capped: u64,
    pub races_recovered: u64,
}

#[derive(Default)]
struct AtomicCounters {
    entities_created: AtomicU64,
    entities_merged: AtomicU64,
    relationships_created: AtomicU64,
    symmetric_created: AtomicU64,
    duplicates_suppressed: AtomicU64,
    degree_capped: AtomicU64,
    races_recovered: AtomicU64,
}

/// Per-chunk persistence result.
#[derive(Debug, Clone, Default)]
pub struct ChunkGraphStats {
    pub entities_resolved: usize,
    pub relationships_created: usize,
}

/// Transactional persistence layer for one knowledge base.
///
/// Resolves entity candidates against the database with canonical-id and
/// embedding-similarity dedup, computes relationship weights, synthesizes
/// symmetric edges, and enforces the degree cap. Shared across workers; the
/// per-canonical-id critical section runs on a striped lock table so two
/// workers introducing the same entity serialize on the insert.
pub struct GraphStore<D: GraphDatabase, E: EmbeddingProvider> {
    db: D,
    embedder: E,
    config: KnowledgeGraphConfig,
    cache: Option<EntityCache>,
    stripes: Vec<Mutex<()>>,
    counters: AtomicCounters,
}

impl<D: GraphDatabase, E: EmbeddingProvider> GraphStore<D, E> {
    pub fn new(db: D, embedder: E, config: KnowledgeGraphConfig) -> Self {
        let cache = if config.enable_enhanced_kg {
            Some(EntityCache::new(config.entity_cache_size))
        } else {
            None
        };

        info!(
            "GraphStore initialized (enhanced={}, threshold={}, cache={})",
            config.enable_enhanced_kg,
            config.effective_threshold(),
            cache.is_some()
        );

        Self {
            db,
            embedder,
            config,
            cache,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            counters: AtomicCounters::default(),
        }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            entities_created: self.counters.entities_created.load(Ordering::Relaxed),
            entities_merged: self.counters.entities_merged.load(Ordering::Relaxed),
            relationships_created: self.counters.relationships_created.load(Ordering::Relaxed),
            symmetric_created: self.counters.symmetric_created.load(Ordering::Relaxed),
            duplicates_suppressed: self.counters.duplicates_suppressed.load(Ordering::Relaxed),
            degree_capped: self.counters.degree_capped.load(Ordering::Relaxed),
            races_recovered: self.counters.races_recovered.load(Ordering::Relaxed),
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Preload the cache with the most recently created entities. No-op in
    /// legacy mode or when warmup is disabled.
    pub async fn warm_cache(&self) -> Result<usize, GraphStoreError> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        if !self.config.cache_warmup_enabled {
            return Ok(0);
        }

        let recent = self
            .db
            .recent_entities(self.config.entity_cache_size)
            .await?;
        let count = recent.len();
        for entity in recent {
            cache.put(entity.canonical_id.clone(), cached_view(&entity));
        }
        if count > 0 {
            info!("entity cache warmed with {} entities", count);
        }
        Ok(count)
    }

    /// Whether any relationships were already recorded against this chunk;
    /// used by the indexer to skip re-extraction.
    pub async fn chunk_already_indexed(&self, chunk_id: &str) -> Result<bool, GraphStoreError> {
        Ok(self.db.count_relationships_for_chunk(chunk_id).await? > 0)
    }

    /// Resolve an entity candidate to a stored entity id, creating the row
    /// if no existing entity matches.
    ///
    /// Resolution order: cache by canonical id, database by canonical id,
    /// embedding top-1 at the effective threshold, fresh insert. A lost
    /// unique-constraint race on the insert is recovered by re-reading the
    /// winner and overwriting the tentative cache entry.
    pub async fn find_or_create_entity(
        &self,
        name: &str,
        description: &str,
        covariates: &HashMap<String, serde_json::Value>,
    ) -> Result<String, GraphStoreError> {
        let canonical_active = self.config.is_feature_enabled(Feature::Canonicalization);
        let cid = canonical_id(name, description, canonical_active);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cid) {
                if self.wants_alias(name, &hit.display_name, &hit.aliases) {
                    if let Some(existing) = self.db.get_entity(&hit.entity_id).await? {
                        let updated = self.merge_metadata(&existing, name, covariates).await?;
                        cache.put(cid.clone(), cached_view(&updated));
                    }
                }
                return Ok(hit.entity_id);
            }
        }

        let _guard = self.stripe(&cid).lock().await;

        if let Some(existing) = self.db.get_entity_by_canonical_id(&cid).await? {
            let updated = self.merge_metadata(&existing, name, covariates).await?;
            self.cache_put(&cid, &updated);
            return Ok(existing.id);
        }

        let input = embedding_input(name, description, self.config.enable_enhanced_kg);
        let embedding = self.embedder.embed(&input).await?;

        if let Some(similar) = self.db.nearest_entity(&embedding).await? {
            if similar.similarity >= self.config.effective_threshold() {
                debug!(
                    "merging '{}' into entity {} (similarity {:.3})",
                    safe_truncate(name, 40),
                    similar.entity.id,
                    similar.similarity
                );
                let updated = self.merge_metadata(&similar.entity, name, covariates).await?;
                self.counters.entities_merged.fetch_add(1, Ordering::Relaxed);
                self.cache_put(&cid, &updated);
                return Ok(similar.entity.id);
            }
        }

        let record = EntityRecord {
            id: EntityRecord::new_id(),
            display_name: name.to_string(),
            normalized_name: normalize_name(name, canonical_active),
            canonical_id: cid.clone(),
            description: description.to_string(),
            embedding,
            aliases: Vec::new(),
            covariates: covariates.clone(),
            created_at: Utc::now(),
        };

        match self.db.insert_entity(record.clone()).await {
            Ok(()) => {
                self.counters.entities_created.fetch_add(1, Ordering::Relaxed);
                debug!("created entity {} ('{}')", record.id, safe_truncate(name, 40));
                self.cache_put(&cid, &record);
                Ok(record.id)
            }
            Err(StorageError::UniqueViolation { .. }) => {
                self.counters.races_recovered.fetch_add(1, Ordering::Relaxed);
                warn!("lost entity insert race for {}, re-reading winner", cid);
                let winner = self
                    .db
                    .get_entity_by_canonical_id(&cid)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(cid.clone()))?;
                self.cache_put(&cid, &winner);
                Ok(winner.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a weighted relationship, enforcing the degree cap and
    /// synthesizing the inverse edge for symmetric types.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        confidence: f64,
        description: &str,
        raw_type: &str,
        provenance: &Provenance,
    ) -> Result<RelationshipOutcome, GraphStoreError> {
        let typed = self.config.is_feature_enabled(Feature::TypedRelationships);
        let rel_type = if typed { rel_type } else { RelationshipType::Generic };
        let confidence = confidence.clamp(0.0, 1.0);
        let weight = if typed {
            relationship_weight(rel_type, confidence)
        } else {
            0.0
        };

        let outcome = self
            .insert_edge(
                source_id, target_id, rel_type, confidence, weight, description, raw_type,
                provenance,
            )
            .await?;

        if outcome == RelationshipOutcome::Created
            && rel_type.is_symmetric()
            && self.config.is_feature_enabled(Feature::SymmetricRelationships)
            && source_id != target_id
        {
            let inverse_description = format!("[inverse] {}", description);
            let inverse = self
                .insert_edge(
                    target_id,
                    source_id,
                    rel_type,
                    confidence,
                    weight,
                    &inverse_description,
                    raw_type,
                    provenance,
                )
                .await?;
            if inverse == RelationshipOutcome::Created {
                self.counters.symmetric_created.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(outcome)
    }

    /// Persist one chunk's extraction: every entity candidate is resolved
    /// before any relationship is inserted.
    pub async fn add(
        &self,
        extraction: &Extraction,
        provenance: &Provenance,
    ) -> Result<ChunkGraphStats, GraphStoreError> {
        let mut resolved: HashMap<&str, String> = HashMap::with_capacity(extraction.entities.len());
        for candidate in &extraction.entities {
            let id = self
                .find_or_create_entity(&candidate.name, &candidate.description, &candidate.covariates)
                .await?;
            resolved.insert(candidate.name.as_str(), id);
        }

        let mut created = 0;
        for rel in &extraction.relationships {
            let (Some(source), Some(target)) = (
                resolved.get(rel.source_name.as_str()),
                resolved.get(rel.target_name.as_str()),
            ) else {
                debug!(
                    "skipping relationship with unresolved endpoint: {} -> {}",
                    rel.source_name, rel.target_name
                );
                continue;
            };

            if source == target {
                debug!(
                    "skipping self-referential relationship on '{}'",
                    rel.source_name
                );
                continue;
            }

            let outcome = self
                .create_relationship(
                    source,
                    target,
                    rel.rel_type,
                    rel.confidence,
                    &rel.description,
                    &rel.raw_type,
                    provenance,
                )
                .await?;
            if outcome == RelationshipOutcome::Created {
                created += 1;
            }
        }

        debug!(
            "chunk {} persisted: {} entities, {} relationships",
            provenance.chunk_id,
            resolved.len(),
            created
        );

        Ok(ChunkGraphStats {
            entities_resolved: resolved.len(),
            relationships_created: created,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_edge(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        confidence: f64,
        weight: f64,
        description: &str,
        raw_type: &str,
        provenance: &Provenance,
    ) -> Result<RelationshipOutcome, GraphStoreError> {
        // Count-then-insert must be serialized per source or concurrent
        // writers could push the out-degree past the cap.
        let _guard = self.stripe(source_id).lock().await;

        let outgoing = self.db.count_outgoing(source_id).await?;
        if outgoing >= self.config.max_edges_per_entity {
            self.counters.degree_capped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "degree cap reached for {} ({} outgoing), rejecting {} edge to {}",
                source_id, outgoing, rel_type, target_id
            );
            return Ok(RelationshipOutcome::DegreeCapped);
        }

        let record = RelationshipRecord {
            id: RelationshipRecord::new_id(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rel_type,
            confidence,
            weight,
            description: description.to_string(),
            document_id: provenance.document_id.clone(),
            chunk_id: provenance.chunk_id.clone(),
            raw_type: raw_type.to_string(),
            created_at: Utc::now(),
        };

        if !self.db.insert_relationship(record).await? {
            self.counters
                .duplicates_suppressed
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                "duplicate {} relationship {} -> {} suppressed",
                rel_type, source_id, target_id
            );
            return Ok(RelationshipOutcome::Duplicate);
        }

        self.counters
            .relationships_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            "created {} relationship {} -> {} (weight {:.2})",
            rel_type, source_id, target_id, weight
        );
        Ok(RelationshipOutcome::Created)
    }

    /// Append the new surface form as an alias and union-merge covariates,
    /// writing back only when something changed. Existing covariate values
    /// always win conflicts; display_name is never touched.
    async fn merge_metadata(
        &self,
        existing: &EntityRecord,
        surface_name: &str,
        covariates: &HashMap<String, serde_json::Value>,
    ) -> Result<EntityRecord, GraphStoreError> {
        let mut updated = existing.clone();
        let mut dirty = false;

        if self.wants_alias(surface_name, &existing.display_name, &existing.aliases) {
            updated.aliases.push(surface_name.to_string());
            dirty = true;
            debug!(
                "recorded alias '{}' for entity {}",
                safe_truncate(surface_name, 40),
                existing.id
            );
        }

        for (key, value) in covariates {
            if !updated.covariates.contains_key(key) {
                updated.covariates.insert(key.clone(), value.clone());
                dirty = true;
            }
        }

        if dirty {
            self.db
                .update_entity_metadata(&existing.id, updated.aliases.clone(), updated.covariates.clone())
                .await?;
        }

        Ok(updated)
    }

    fn wants_alias(&self, surface_name: &str, display_name: &str, aliases: &[String]) -> bool {
        self.config.is_feature_enabled(Feature::AliasTracking)
            && surface_name != display_name
            && !aliases.iter().any(|a| a == surface_name)
    }

    fn cache_put(&self, cid: &str, entity: &EntityRecord) {
        if let Some(cache) = &self.cache {
            cache.put(cid.to_string(), cached_view(entity));
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % LOCK_STRIPES]
    }
}

fn cached_view(entity: &EntityRecord) -> CachedEntity {
    CachedEntity {
        entity_id: entity.id.clone(),
        display_name: entity.display_name.clone(),
        normalized_name: entity.normalized_name.clone(),
        aliases: entity.aliases.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryGraph;
    use crate::testing::FirstTokenEmbedder;
    use std::sync::Arc;

    fn provenance() -> Provenance {
        Provenance {
            document_id: "doc".to_string(),
            chunk_id: "chunk-1".to_string(),
        }
    }

    fn enhanced_store() -> GraphStore<Arc<InMemoryGraph>, FirstTokenEmbedder> {
        GraphStore::new(
            Arc::new(InMemoryGraph::new()),
            FirstTokenEmbedder::new(),
            KnowledgeGraphConfig::enhanced(),
        )
    }

    fn no_covariates() -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    #[tokio::test]
    async fn identical_candidates_resolve_to_one_entity() {
        let store = enhanced_store();

        let a = store
            .find_or_create_entity("ICU", "intensive care unit", &no_covariates())
            .await
            .unwrap();
        let b = store
            .find_or_create_entity("ICU", "intensive care unit", &no_covariates())
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(store.database().entity_count().await.unwrap(), 1);
        assert_eq!(store.counters().entities_created, 1);
    }

    #[tokio::test]
    async fn surface_variants_merge_with_aliases() {
        let store = enhanced_store();

        let a = store
            .find_or_create_entity("ICU", "intensive care unit", &no_covariates())
            .await
            .unwrap();
        // Same normalized name and description: canonical-id hit.
        let b = store
            .find_or_create_entity("I.C.U.", "intensive care unit", &no_covariates())
            .await
            .unwrap();
        // Different description: resolved through embedding similarity.
        let c = store
            .find_or_create_entity("icu", "the intensive care unit of a hospital", &no_covariates())
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(store.database().entity_count().await.unwrap(), 1);

        let entity = store.database().get_entity(&a).await.unwrap().unwrap();
        assert_eq!(entity.display_name, "ICU");
        assert_eq!(entity.aliases, vec!["I.C.U.", "icu"]);
    }

    #[tokio::test]
    async fn legacy_mode_keeps_surface_variants_apart() {
        let store = GraphStore::new(
            Arc::new(InMemoryGraph::new()),
            FirstTokenEmbedder::new(),
            KnowledgeGraphConfig::legacy(),
        );

        store
            .find_or_create_entity("ICU", "intensive care unit", &no_covariates())
            .await
            .unwrap();
        store
            .find_or_create_entity("I.C.U.", "intensive care unit", &no_covariates())
            .await
            .unwrap();
        store
            .find_or_create_entity("icu", "intensive care unit", &no_covariates())
            .await
            .unwrap();

        assert_eq!(store.database().entity_count().await.unwrap(), 3);
        for entity in store.database().list_entities().await.unwrap() {
            assert!(entity.aliases.is_empty());
        }
    }

    #[tokio::test]
    async fn similarity_exactly_at_threshold_merges() {
        let config = KnowledgeGraphConfig {
            entity_distance_threshold: 1.0,
            ..KnowledgeGraphConfig::enhanced()
        };
        let store = GraphStore::new(
            Arc::new(InMemoryGraph::new()),
            FirstTokenEmbedder::new(),
            config,
        );

        let a = store
            .find_or_create_entity("heparin", "anticoagulant", &no_covariates())
            .await
            .unwrap();
        // Same first token keys an identical fake embedding: similarity 1.0,
        // which must merge under a threshold of 1.0.
        let b = store
            .find_or_create_entity("heparin", "different description text", &no_covariates())
            .await
            .unwrap();

        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn covariates_merge_by_union_keeping_existing() {
        let store = enhanced_store();

        let mut first = HashMap::new();
        first.insert("entity_type".to_string(), serde_json::json!("drug"));
        let a = store
            .find_or_create_entity("heparin", "anticoagulant", &first)
            .await
            .unwrap();

        // A different description forces resolution through the similarity
        // path, which is where metadata merging happens.
        let mut second = HashMap::new();
        second.insert("entity_type".to_string(), serde_json::json!("medication"));
        second.insert("route".to_string(), serde_json::json!("IV"));
        let b = store
            .find_or_create_entity("heparin", "unfractionated anticoagulant agent", &second)
            .await
            .unwrap();

        assert_eq!(a, b);
        let entity = store.database().get_entity(&a).await.unwrap().unwrap();
        assert_eq!(entity.covariates.get("entity_type"), Some(&serde_json::json!("drug")));
        assert_eq!(entity.covariates.get("route"), Some(&serde_json::json!("IV")));
    }

    #[tokio::test]
    async fn relationship_weight_and_idempotence() {
        let store = enhanced_store();
        let source = store
            .find_or_create_entity("sepsis", "systemic infection", &no_covariates())
            .await
            .unwrap();
        let target = store
            .find_or_create_entity("septic shock", "refractory hypotension", &no_covariates())
            .await
            .unwrap();

        let outcome = store
            .create_relationship(
                &source,
                &target,
                RelationshipType::Hypernym,
                0.9,
                "progresses to",
                "hypernym",
                &provenance(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RelationshipOutcome::Created);

        let again = store
            .create_relationship(
                &source,
                &target,
                RelationshipType::Hypernym,
                0.9,
                "progresses to",
                "hypernym",
                &provenance(),
            )
            .await
            .unwrap();
        assert_eq!(again, RelationshipOutcome::Duplicate);

        let relationships = store.database().list_relationships().await.unwrap();
        assert_eq!(relationships.len(), 1);
        assert!((relationships[0].weight - 9.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn symmetric_types_get_inverse_edges() {
        let store = enhanced_store();
        let map = store
            .find_or_create_entity("MAP", "mean arterial pressure reading", &no_covariates())
            .await
            .unwrap();
        let pressure = store
            .find_or_create_entity("mean arterial pressure", "perfusion pressure", &no_covariates())
            .await
            .unwrap();

        store
            .create_relationship(
                &map,
                &pressure,
                RelationshipType::Synonym,
                0.8,
                "same measurement",
                "synonym",
                &provenance(),
            )
            .await
            .unwrap();

        let relationships = store.database().list_relationships().await.unwrap();
        assert_eq!(relationships.len(), 2);
        for rel in &relationships {
            assert_eq!(rel.rel_type, RelationshipType::Synonym);
            assert_eq!(rel.confidence, 0.8);
            assert!((rel.weight - 7.6).abs() < 1e-9);
        }
        let inverse = relationships
            .iter()
            .find(|r| r.source_id == pressure)
            .unwrap();
        assert!(inverse.description.starts_with("[inverse] "));
        assert_eq!(store.counters().symmetric_created, 1);
    }

    #[tokio::test]
    async fn directed_types_get_no_inverse() {
        let store = enhanced_store();
        let a = store
            .find_or_create_entity("sepsis", "d1", &no_covariates())
            .await
            .unwrap();
        let b = store
            .find_or_create_entity("hypotension", "d2", &no_covariates())
            .await
            .unwrap();

        store
            .create_relationship(
                &a,
                &b,
                RelationshipType::Causal,
                0.9,
                "causes",
                "causal",
                &provenance(),
            )
            .await
            .unwrap();

        assert_eq!(store.database().relationship_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn degree_cap_rejects_excess_edges() {
        let config = KnowledgeGraphConfig {
            max_edges_per_entity: 2,
            ..KnowledgeGraphConfig::enhanced()
        };
        let store = GraphStore::new(
            Arc::new(InMemoryGraph::new()),
            FirstTokenEmbedder::new(),
            config,
        );

        let hub = store
            .find_or_create_entity("norepinephrine", "vasopressor", &no_covariates())
            .await
            .unwrap();
        let mut outcomes = Vec::new();
        for name in ["alpha receptor", "beta receptor", "gamma receptor"] {
            let target = store
                .find_or_create_entity(name, "receptor", &no_covariates())
                .await
                .unwrap();
            outcomes.push(
                store
                    .create_relationship(
                        &hub,
                        &target,
                        RelationshipType::Causal,
                        0.9,
                        "activates",
                        "causal",
                        &provenance(),
                    )
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(
            outcomes,
            vec![
                RelationshipOutcome::Created,
                RelationshipOutcome::Created,
                RelationshipOutcome::DegreeCapped,
            ]
        );
        assert_eq!(store.database().count_outgoing(&hub).await.unwrap(), 2);
        assert_eq!(store.counters().degree_capped, 1);
    }

    #[tokio::test]
    async fn symmetric_inverse_respects_target_cap() {
        let config = KnowledgeGraphConfig {
            max_edges_per_entity: 1,
            ..KnowledgeGraphConfig::enhanced()
        };
        let store = GraphStore::new(
            Arc::new(InMemoryGraph::new()),
            FirstTokenEmbedder::new(),
            config,
        );

        let a = store
            .find_or_create_entity("adrenaline", "hormone", &no_covariates())
            .await
            .unwrap();
        let b = store
            .find_or_create_entity("epinephrine", "hormone", &no_covariates())
            .await
            .unwrap();
        let c = store
            .find_or_create_entity("noradrenaline", "hormone", &no_covariates())
            .await
            .unwrap();

        // Fill b's single outgoing slot first.
        store
            .create_relationship(
                &b,
                &c,
                RelationshipType::Causal,
                0.9,
                "precursor of",
                "causal",
                &provenance(),
            )
            .await
            .unwrap();

        // Primary a -> b fits under a's cap; the synthesized b -> a inverse
        // would exceed b's cap and is dropped.
        let outcome = store
            .create_relationship(
                &a,
                &b,
                RelationshipType::Synonym,
                0.9,
                "same molecule",
                "synonym",
                &provenance(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RelationshipOutcome::Created);

        assert_eq!(store.database().count_outgoing(&a).await.unwrap(), 1);
        assert_eq!(store.database().count_outgoing(&b).await.unwrap(), 1);
        assert_eq!(store.counters().degree_capped, 1);
        assert_eq!(store.counters().symmetric_created, 0);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        use crate::graph::types::{EntityCandidate, RelationshipCandidate};

        let store = enhanced_store();
        let extraction = Extraction {
            entities: vec![
                EntityCandidate {
                    name: "sepsis".to_string(),
                    description: "systemic infection".to_string(),
                    covariates: HashMap::new(),
                },
                EntityCandidate {
                    name: "hypotension".to_string(),
                    description: "low blood pressure".to_string(),
                    covariates: HashMap::new(),
                },
            ],
            relationships: vec![RelationshipCandidate {
                source_name: "sepsis".to_string(),
                target_name: "hypotension".to_string(),
                rel_type: RelationshipType::Causal,
                raw_type: "causal".to_string(),
                confidence: 0.9,
                description: "causes".to_string(),
            }],
        };

        store.add(&extraction, &provenance()).await.unwrap();
        let entities_once = store.database().entity_count().await.unwrap();
        let relationships_once = store.database().relationship_count().await.unwrap();

        store.add(&extraction, &provenance()).await.unwrap();
        assert_eq!(store.database().entity_count().await.unwrap(), entities_once);
        assert_eq!(
            store.database().relationship_count().await.unwrap(),
            relationships_once
        );
    }

    #[tokio::test]
    async fn concurrent_resolution_converges_on_one_entity() {
        let store = Arc::new(enhanced_store());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .find_or_create_entity(
                        "norepinephrine",
                        "first-line vasopressor",
                        &HashMap::new(),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.database().entity_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn warm_cache_preloads_recent_entities() {
        let db = Arc::new(InMemoryGraph::new());
        let seed = GraphStore::new(
            db.clone(),
            FirstTokenEmbedder::new(),
            KnowledgeGraphConfig::enhanced(),
        );
        seed.find_or_create_entity("sepsis", "d1", &no_covariates())
            .await
            .unwrap();
        seed.find_or_create_entity("heparin", "d2", &no_covariates())
            .await
            .unwrap();

        let store = GraphStore::new(
            db,
            FirstTokenEmbedder::new(),
            KnowledgeGraphConfig::enhanced(),
        );
        assert_eq!(store.warm_cache().await.unwrap(), 2);

        // Warmed entries hit without touching the similarity path.
        store
            .find_or_create_entity("sepsis", "d1", &no_covariates())
            .await
            .unwrap();
        assert_eq!(store.cache_stats().unwrap().hits, 1);
    }
}
