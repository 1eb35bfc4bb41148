use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Semantic type of a relationship edge.
///
/// The taxonomy is fixed; extraction output that does not parse into one of
/// these falls back to `Generic`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    Hypernym,
    Hyponym,
    Meronym,
    Holonym,
    Synonym,
    Antonym,
    Causal,
    Temporal,
    Dependency,
    Reference,
    Generic,
}

impl RelationshipType {
    /// Fixed base weight per type; multiplied by confidence and scaled by 10
    /// to produce the stored edge weight.
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::Hypernym | Self::Hyponym => 1.0,
            Self::Synonym => 0.95,
            Self::Meronym | Self::Holonym | Self::Antonym => 0.9,
            Self::Dependency => 0.85,
            Self::Causal => 0.8,
            Self::Temporal => 0.7,
            Self::Reference => 0.6,
            Self::Generic => 0.5,
        }
    }

    /// Synonym and antonym are their own inverses; every other type is
    /// directed and never synthesized in reverse.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Synonym | Self::Antonym)
    }

    /// Lenient parse used on raw LLM output: unknown labels become `Generic`.
    pub fn from_label(label: &str) -> Self {
        label.trim().parse().unwrap_or(Self::Generic)
    }
}

/// Stored edge weight: `clamp(confidence, 0, 1) × base(type) × 10`.
pub fn relationship_weight(rel_type: RelationshipType, confidence: f64) -> f64 {
    confidence.clamp(0.0, 1.0) * rel_type.base_weight() * 10.0
}

/// Entity candidate produced by extraction, before resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    pub description: String,
    /// Auxiliary attributes such as `entity_type`, merged into the resolved
    /// entity's metadata by union.
    pub covariates: HashMap<String, serde_json::Value>,
}

/// Relationship candidate produced by extraction, referencing entities by
/// their extracted names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub source_name: String,
    pub target_name: String,
    pub rel_type: RelationshipType,
    /// Type label as the LLM produced it, kept for provenance.
    pub raw_type: String,
    pub confidence: f64,
    pub description: String,
}

/// Transient result of extracting one chunk. Discarded after persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<EntityCandidate>,
    pub relationships: Vec<RelationshipCandidate>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Where a stored entity or relationship came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub document_id: String,
    pub chunk_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn base_weights_match_taxonomy() {
        assert_eq!(RelationshipType::Hypernym.base_weight(), 1.0);
        assert_eq!(RelationshipType::Hyponym.base_weight(), 1.0);
        assert_eq!(RelationshipType::Meronym.base_weight(), 0.9);
        assert_eq!(RelationshipType::Holonym.base_weight(), 0.9);
        assert_eq!(RelationshipType::Synonym.base_weight(), 0.95);
        assert_eq!(RelationshipType::Antonym.base_weight(), 0.9);
        assert_eq!(RelationshipType::Causal.base_weight(), 0.8);
        assert_eq!(RelationshipType::Temporal.base_weight(), 0.7);
        assert_eq!(RelationshipType::Dependency.base_weight(), 0.85);
        assert_eq!(RelationshipType::Reference.base_weight(), 0.6);
        assert_eq!(RelationshipType::Generic.base_weight(), 0.5);
    }

    #[test]
    fn only_synonym_and_antonym_are_symmetric() {
        for rel_type in RelationshipType::iter() {
            let expected = matches!(
                rel_type,
                RelationshipType::Synonym | RelationshipType::Antonym
            );
            assert_eq!(rel_type.is_symmetric(), expected, "{rel_type}");
        }
    }

    #[test]
    fn unknown_labels_fall_back_to_generic() {
        assert_eq!(
            RelationshipType::from_label("hypernym"),
            RelationshipType::Hypernym
        );
        assert_eq!(
            RelationshipType::from_label("HYPERNYM"),
            RelationshipType::Hypernym
        );
        assert_eq!(
            RelationshipType::from_label("is-kind-of"),
            RelationshipType::Generic
        );
        assert_eq!(RelationshipType::from_label(""), RelationshipType::Generic);
    }

    #[test]
    fn weight_formula() {
        let weight = relationship_weight(RelationshipType::Hypernym, 0.9);
        assert!((weight - 9.0).abs() < 1e-9);

        let weight = relationship_weight(RelationshipType::Synonym, 0.8);
        assert!((weight - 7.6).abs() < 1e-9);

        // Confidence is clamped before multiplication.
        let weight = relationship_weight(RelationshipType::Generic, 1.7);
        assert!((weight - 5.0).abs() < 1e-9);
        let weight = relationship_weight(RelationshipType::Generic, -0.2);
        assert_eq!(weight, 0.0);
    }

    #[test]
    fn display_round_trips_through_from_label() {
        for rel_type in RelationshipType::iter() {
            assert_eq!(RelationshipType::from_label(&rel_type.to_string()), rel_type);
        }
    }
}
