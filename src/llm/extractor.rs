use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::provider::LlmProvider;
use crate::core::config::{Feature, KnowledgeGraphConfig};
use crate::graph::types::{
    EntityCandidate, Extraction, RelationshipCandidate, RelationshipType,
};
use crate::utils::safe_truncate;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 200;
const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("extraction failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

const UNIFIED_SYSTEM_PROMPT: &str = r#"You are a knowledge graph extraction system. Analyze the text and extract entities and relationships in a single pass.

Extract entities: name, description (a complete sentence), entity_type (e.g. drug, receptor, pathway, condition, procedure, biomarker, concept), metadata (optional structured attributes).
Extract relationships: source_entity, target_entity, relationship_desc (a complete sentence), relationship_type, confidence (0.0-1.0).

relationship_type must be one of: hypernym, hyponym, meronym, holonym, synonym, antonym, causal, temporal, dependency, reference, generic.
Assign confidence by text clarity: 0.9+ for explicit statements, 0.7-0.8 for clear implications, 0.5-0.6 for weak inferences.
Both source_entity and target_entity must name entities from the entities list.

Respond only in JSON:
{"entities": [{"name": "...", "description": "...", "entity_type": "...", "metadata": {}}], "relationships": [{"source_entity": "...", "target_entity": "...", "relationship_desc": "...", "relationship_type": "...", "confidence": 0.8}]}"#;

const LEGACY_GRAPH_PROMPT: &str = r#"You are a knowledge graph extraction system. Analyze the text and extract entities and the relationships between them.

Extract entities: name, description (a complete sentence).
Extract relationships: source_entity, target_entity, relationship_desc (a complete sentence). Both must name entities from the entities list.

Respond only in JSON:
{"entities": [{"name": "...", "description": "..."}], "relationships": [{"source_entity": "...", "target_entity": "...", "relationship_desc": "..."}]}"#;

const LEGACY_COVARIATE_PROMPT: &str = r#"You are a knowledge graph metadata system. For each entity listed, determine its type and any structured attributes supported by the text.

Respond only in JSON:
{"covariates": [{"entity_name": "...", "entity_type": "...", "metadata": {}}]}"#;

fn default_entity_type() -> String {
    "concept".to_string()
}

fn default_relationship_type() -> String {
    RelationshipType::Generic.to_string()
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

#[derive(Debug, Deserialize)]
struct WireEntity {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_entity_type")]
    entity_type: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireRelationship {
    source_entity: String,
    target_entity: String,
    #[serde(default)]
    relationship_desc: String,
    #[serde(default = "default_relationship_type")]
    relationship_type: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct WireGraph {
    #[serde(default)]
    entities: Vec<WireEntity>,
    #[serde(default)]
    relationships: Vec<WireRelationship>,
}

#[derive(Debug, Default, Deserialize)]
struct WireCovariates {
    #[serde(default)]
    covariates: Vec<WireCovariate>,
}

#[derive(Debug, Deserialize)]
struct WireCovariate {
    entity_name: String,
    #[serde(default = "default_entity_type")]
    entity_type: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Chunk-level extractor over the LLM oracle.
///
/// Enhanced mode issues exactly one structured call per chunk covering
/// entities, covariates and typed relationships; legacy mode reproduces the
/// historical pair of calls (graph, then covariates). Raw oracle output is
/// validated before anything reaches the store.
pub struct KgExtractor<P: LlmProvider> {
    provider: P,
    config: KnowledgeGraphConfig,
    llm_calls: AtomicU64,
    low_confidence_drops: AtomicU64,
}

impl<P: LlmProvider> KgExtractor<P> {
    pub fn new(provider: P, config: KnowledgeGraphConfig) -> Self {
        Self {
            provider,
            config,
            llm_calls: AtomicU64::new(0),
            low_confidence_drops: AtomicU64::new(0),
        }
    }

    /// Total oracle calls issued, including retries. Feeds the
    /// calls-per-chunk KPI.
    pub fn llm_calls(&self) -> u64 {
        self.llm_calls.load(Ordering::Relaxed)
    }

    /// Relationships silently dropped below the confidence floor.
    pub fn low_confidence_drops(&self) -> u64 {
        self.low_confidence_drops.load(Ordering::Relaxed)
    }

    pub async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        if self.config.enable_enhanced_kg {
            let graph: WireGraph = self
                .call_json(UNIFIED_SYSTEM_PROMPT, &extraction_user_prompt(text))
                .await?;
            let extraction = self.validate(graph);
            debug!(
                "unified extraction complete: {} entities, {} relationships",
                extraction.entities.len(),
                extraction.relationships.len()
            );
            return Ok(extraction);
        }

        // Legacy path: one call for the graph, a second for covariates.
        let mut graph: WireGraph = self
            .call_json(LEGACY_GRAPH_PROMPT, &extraction_user_prompt(text))
            .await?;

        if !graph.entities.is_empty() {
            let names: Vec<&str> = graph.entities.iter().map(|e| e.name.as_str()).collect();
            let covariates: WireCovariates = self
                .call_json(LEGACY_COVARIATE_PROMPT, &covariate_user_prompt(text, &names))
                .await?;

            let mut by_name: HashMap<String, WireCovariate> = covariates
                .covariates
                .into_iter()
                .map(|c| (c.entity_name.trim().to_string(), c))
                .collect();
            for entity in &mut graph.entities {
                if let Some(covariate) = by_name.remove(entity.name.trim()) {
                    entity.entity_type = covariate.entity_type;
                    entity.metadata.extend(covariate.metadata);
                }
            }
        }

        let extraction = self.validate(graph);
        debug!(
            "legacy extraction complete: {} entities, {} relationships",
            extraction.entities.len(),
            extraction.relationships.len()
        );
        Ok(extraction)
    }

    async fn call_json<T: serde::de::DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<T, ExtractionError> {
        let mut last_error = String::new();
        let mut delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 1..=MAX_ATTEMPTS {
            self.llm_calls.fetch_add(1, Ordering::Relaxed);

            match self
                .provider
                .generate(system_prompt, user_prompt, Some("json_object"))
                .await
            {
                Ok((content, _metadata)) => {
                    match serde_json::from_str::<T>(strip_code_fences(&content)) {
                        Ok(parsed) => return Ok(parsed),
                        Err(e) => {
                            warn!(
                                "malformed extraction payload (attempt {}): {} — {}",
                                attempt,
                                e,
                                safe_truncate(&content, 120)
                            );
                            last_error = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    warn!("LLM call failed (attempt {}): {}", attempt, e);
                    last_error = e.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(ExtractionError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }

    /// Normalize raw oracle output into a well-formed `Extraction`: clamp
    /// confidences, enforce the confidence floor, drop edges that reference
    /// entities the same response did not produce, and map unknown type
    /// labels to `generic`.
    fn validate(&self, graph: WireGraph) -> Extraction {
        let typed = self.config.is_feature_enabled(Feature::TypedRelationships);

        let mut entities = Vec::with_capacity(graph.entities.len());
        for wire in graph.entities {
            let name = wire.name.trim().to_string();
            if name.is_empty() {
                continue;
            }

            let mut covariates = HashMap::new();
            covariates.insert(
                "entity_type".to_string(),
                serde_json::Value::String(wire.entity_type),
            );
            covariates.extend(wire.metadata);

            entities.push(EntityCandidate {
                name,
                description: wire.description.trim().to_string(),
                covariates,
            });
        }

        let known_names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();

        let mut relationships = Vec::with_capacity(graph.relationships.len());
        for wire in graph.relationships {
            let confidence = if wire.confidence.is_finite() {
                wire.confidence.clamp(0.0, 1.0)
            } else {
                DEFAULT_CONFIDENCE
            };

            if confidence < self.config.min_relationship_confidence {
                self.low_confidence_drops.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "dropping low-confidence relationship {} -> {} ({:.2})",
                    wire.source_entity, wire.target_entity, confidence
                );
                continue;
            }

            let source_name = wire.source_entity.trim().to_string();
            let target_name = wire.target_entity.trim().to_string();
            if !known_names.contains(source_name.as_str())
                || !known_names.contains(target_name.as_str())
            {
                debug!(
                    "dropping relationship with unknown endpoint: {} -> {}",
                    source_name, target_name
                );
                continue;
            }

            let rel_type = if typed {
                RelationshipType::from_label(&wire.relationship_type)
            } else {
                RelationshipType::Generic
            };

            relationships.push(RelationshipCandidate {
                source_name,
                target_name,
                rel_type,
                raw_type: wire.relationship_type,
                confidence,
                description: wire.relationship_desc.trim().to_string(),
            });
        }

        Extraction {
            entities,
            relationships,
        }
    }
}

fn extraction_user_prompt(text: &str) -> String {
    format!("Extract the knowledge graph from this text:\n\n{}", text)
}

fn covariate_user_prompt(text: &str, names: &[&str]) -> String {
    format!(
        "Entities: {}\n\nSource text:\n\n{}",
        names.join(", "),
        text
    )
}

/// Oracles regularly wrap JSON in markdown fences despite format mode.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
