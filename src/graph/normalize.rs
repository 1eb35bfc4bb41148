use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Characters of the description that participate in the canonical digest.
const CANONICAL_DESCRIPTION_CHARS: usize = 100;

/// Hex characters kept from the SHA-256 digest.
const CANONICAL_ID_LEN: usize = 16;

/// Canonical form of an entity name: NFKC, lowercased, trimmed, stripped of
/// everything but letters, digits, whitespace and hyphens, with internal
/// whitespace collapsed to single spaces.
///
/// With canonicalization disabled the name passes through untouched, which is
/// what keeps legacy runs bit-for-bit compatible.
pub fn normalize_name(name: &str, enabled: bool) -> String {
    if !enabled {
        return name.to_string();
    }

    let folded: String = name.nfkc().collect::<String>().to_lowercase();
    let kept: String = folded
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic dedup key: first 16 hex chars of SHA-256 over
/// `normalized_name :: description[..100]`. Disabled mode returns the raw
/// name so that legacy rows key on surface form alone.
pub fn canonical_id(name: &str, description: &str, enabled: bool) -> String {
    if !enabled {
        return name.to_string();
    }

    let normalized = normalize_name(name, true);
    let prefix: String = description.chars().take(CANONICAL_DESCRIPTION_CHARS).collect();
    let digest = Sha256::digest(format!("{}::{}", normalized, prefix).as_bytes());

    digest
        .iter()
        .take(CANONICAL_ID_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Text fed to the embedding model. Enhanced mode embeds the normalized name
/// together with the description so near-duplicate surface forms land close
/// in vector space; legacy mode embeds the raw name.
pub fn embedding_input(name: &str, description: &str, enhanced: bool) -> String {
    if !enhanced {
        return name.to_string();
    }

    let normalized = normalize_name(name, true);
    if description.is_empty() {
        normalized
    } else {
        format!("{} {}", normalized, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_name("  MySQL   Server  ", true), "mysql server");
        assert_eq!(normalize_name("Septic Shock", true), "septic shock");
    }

    #[test]
    fn strips_punctuation_but_keeps_hyphens() {
        assert_eq!(normalize_name("I.C.U.", true), "icu");
        assert_eq!(
            normalize_name("Data-Processing Engine", true),
            "data-processing engine"
        );
        assert_eq!(normalize_name("User's Guide (v1.0)", true), "users guide v10");
    }

    #[test]
    fn applies_nfkc_compatibility_folding() {
        // Fullwidth forms fold to ASCII under NFKC.
        assert_eq!(normalize_name("ＩＣＵ", true), "icu");
        // The ligature ﬁ expands to "fi".
        assert_eq!(normalize_name("ﬁbrillation", true), "fibrillation");
    }

    #[test]
    fn disabled_mode_is_identity() {
        assert_eq!(normalize_name("  I.C.U.  ", false), "  I.C.U.  ");
        assert_eq!(canonical_id("I.C.U.", "intensive care", false), "I.C.U.");
        assert_eq!(embedding_input("I.C.U.", "intensive care", false), "I.C.U.");
    }

    #[test]
    fn canonical_id_is_16_hex() {
        let cid = canonical_id("norepinephrine", "first-line vasopressor", true);
        assert_eq!(cid.len(), 16);
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_id_ignores_surface_case() {
        let a = canonical_id("Septic Shock", "distributive shock state", true);
        let b = canonical_id("septic shock", "distributive shock state", true);
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_id_depends_on_description() {
        let a = canonical_id("map", "mean arterial pressure", true);
        let b = canonical_id("map", "a chart of terrain", true);
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_id_truncates_description_at_100_chars() {
        let long = "x".repeat(200);
        let a = canonical_id("entity", &long, true);
        let b = canonical_id("entity", &long[..100], true);
        assert_eq!(a, b);

        let c = canonical_id("entity", &format!("{}y", &long[..100]), true);
        assert_eq!(a, c);
    }

    #[test]
    fn embedding_input_combines_normalized_name_and_description() {
        assert_eq!(
            embedding_input("I.C.U.", "intensive care unit", true),
            "icu intensive care unit"
        );
        assert_eq!(embedding_input("ICU", "", true), "icu");
    }

    proptest! {
        #[test]
        fn normalize_is_deterministic(name in "\\PC{0,64}") {
            prop_assert_eq!(normalize_name(&name, true), normalize_name(&name, true));
        }

        #[test]
        fn normalize_is_idempotent(name in "\\PC{0,64}") {
            let once = normalize_name(&name, true);
            prop_assert_eq!(normalize_name(&once, true), once.clone());
        }

        #[test]
        fn normalized_output_is_clean(name in "\\PC{0,64}") {
            let normalized = normalize_name(&name, true);
            prop_assert!(!normalized.contains("  "));
            prop_assert_eq!(normalized.trim(), normalized.as_str());
            prop_assert!(normalized
                .chars()
                .all(|c| c.is_alphanumeric() || c == ' ' || c == '-'));
        }

        #[test]
        fn canonical_id_is_deterministic(
            name in "\\PC{0,32}",
            description in "\\PC{0,160}",
        ) {
            prop_assert_eq!(
                canonical_id(&name, &description, true),
                canonical_id(&name, &description, true)
            );
        }
    }
}
