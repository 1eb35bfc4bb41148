use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("{var} out of range: {value}")]
    OutOfRange { var: &'static str, value: String },
}

/// Feature toggles gated behind the `enable_enhanced_kg` master switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Canonicalization,
    TypedRelationships,
    AliasTracking,
    ParallelProcessing,
    SymmetricRelationships,
}

/// Pipeline configuration, read once from the environment and passed by value.
///
/// With `enable_enhanced_kg` off every enhancement falls back to legacy
/// behavior: similarity threshold 0.1, no entity cache, untyped relationships,
/// sequential chunk processing, no symmetric edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraphConfig {
    pub enable_enhanced_kg: bool,
    pub canonicalization_enabled: bool,
    pub typed_relationships_enabled: bool,
    pub alias_tracking_enabled: bool,
    pub parallel_processing_enabled: bool,
    pub create_symmetric_relationships: bool,

    /// Cosine similarity floor for merging an entity candidate into an
    /// existing entity. Only consulted through `effective_threshold`.
    pub entity_distance_threshold: f64,

    pub entity_cache_size: usize,
    /// Worker pool size; `None` resolves to CPU count + 4.
    pub max_workers: Option<usize>,
    pub chunk_timeout_seconds: u64,

    pub min_relationship_confidence: f64,
    pub max_edges_per_entity: usize,

    pub cache_warmup_enabled: bool,
}

const LEGACY_DISTANCE_THRESHOLD: f64 = 0.1;

impl Default for KnowledgeGraphConfig {
    fn default() -> Self {
        Self {
            enable_enhanced_kg: false,
            canonicalization_enabled: true,
            typed_relationships_enabled: true,
            alias_tracking_enabled: true,
            parallel_processing_enabled: true,
            create_symmetric_relationships: true,
            entity_distance_threshold: 0.85,
            entity_cache_size: 1000,
            max_workers: None,
            chunk_timeout_seconds: 30,
            min_relationship_confidence: 0.3,
            max_edges_per_entity: 50,
            cache_warmup_enabled: true,
        }
    }
}

impl KnowledgeGraphConfig {
    /// All enhancements on. Used by tests and the benchmark's enhanced run.
    pub fn enhanced() -> Self {
        Self {
            enable_enhanced_kg: true,
            ..Self::default()
        }
    }

    /// Baseline behavior with every enhancement off.
    pub fn legacy() -> Self {
        Self::default()
    }

    /// Read the configuration from the environment. Called once at pipeline
    /// construction; components receive the resulting record by value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("ENABLE_ENHANCED_KG") {
            config.enable_enhanced_kg = parse_bool("ENABLE_ENHANCED_KG", &raw)?;
        }
        if let Ok(raw) = std::env::var("KG_ENTITY_DISTANCE_THRESHOLD") {
            let value = parse_num::<f64>("KG_ENTITY_DISTANCE_THRESHOLD", &raw)?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    var: "KG_ENTITY_DISTANCE_THRESHOLD",
                    value: raw,
                });
            }
            config.entity_distance_threshold = value;
        }
        if let Ok(raw) = std::env::var("ENTITY_CACHE_SIZE") {
            let value = parse_num::<usize>("ENTITY_CACHE_SIZE", &raw)?;
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "ENTITY_CACHE_SIZE",
                    value: raw,
                });
            }
            config.entity_cache_size = value;
        }
        if let Ok(raw) = std::env::var("KG_MAX_WORKERS") {
            let value = parse_num::<usize>("KG_MAX_WORKERS", &raw)?;
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "KG_MAX_WORKERS",
                    value: raw,
                });
            }
            config.max_workers = Some(value);
        }
        if let Ok(raw) = std::env::var("KG_CHUNK_TIMEOUT") {
            let value = parse_num::<u64>("KG_CHUNK_TIMEOUT", &raw)?;
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "KG_CHUNK_TIMEOUT",
                    value: raw,
                });
            }
            config.chunk_timeout_seconds = value;
        }
        if let Ok(raw) = std::env::var("KG_MIN_RELATIONSHIP_CONFIDENCE") {
            let value = parse_num::<f64>("KG_MIN_RELATIONSHIP_CONFIDENCE", &raw)?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    var: "KG_MIN_RELATIONSHIP_CONFIDENCE",
                    value: raw,
                });
            }
            config.min_relationship_confidence = value;
        }
        if let Ok(raw) = std::env::var("KG_MAX_EDGES_PER_ENTITY") {
            let value = parse_num::<usize>("KG_MAX_EDGES_PER_ENTITY", &raw)?;
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "KG_MAX_EDGES_PER_ENTITY",
                    value: raw,
                });
            }
            config.max_edges_per_entity = value;
        }

        info!(
            "KnowledgeGraphConfig loaded: enhanced={}, threshold={}, cache_size={}",
            config.enable_enhanced_kg,
            config.effective_threshold(),
            config.entity_cache_size
        );

        Ok(config)
    }

    pub fn is_feature_enabled(&self, feature: Feature) -> bool {
        if !self.enable_enhanced_kg {
            return false;
        }

        match feature {
            Feature::Canonicalization => self.canonicalization_enabled,
            Feature::TypedRelationships => self.typed_relationships_enabled,
            Feature::AliasTracking => self.alias_tracking_enabled,
            Feature::ParallelProcessing => self.parallel_processing_enabled,
            Feature::SymmetricRelationships => self.create_symmetric_relationships,
        }
    }

    /// Merge threshold actually applied: legacy runs always use 0.1.
    pub fn effective_threshold(&self) -> f64 {
        if !self.enable_enhanced_kg {
            return LEGACY_DISTANCE_THRESHOLD;
        }
        self.entity_distance_threshold
    }

    /// Worker pool size; defaults to CPU count + 4 for I/O-bound work.
    pub fn worker_count(&self) -> usize {
        if let Some(workers) = self.max_workers {
            return workers;
        }

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus + 4
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}
