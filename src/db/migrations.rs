//! Additive schema migrations for the knowledge-graph tables.
//!
//! Legacy rows stay queryable: new columns are nullable or defaulted and no
//! backfill runs. Engines execute the statements verbatim; the in-memory
//! store just records applied versions.

use tracing::info;

use super::{GraphDatabase, StorageError};

/// One additive migration step.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

const TYPED_WEIGHTED_GRAPH: Migration = Migration {
    version: "002",
    description: "canonical entity identity and typed weighted relationships",
    statements: &[
        "ALTER TABLE entities ADD COLUMN canonical_id VARCHAR(16) NULL",
        "ALTER TABLE entities ADD COLUMN normalized_name TEXT NULL",
        "ALTER TABLE relationships ADD COLUMN relationship_type VARCHAR(32) NOT NULL DEFAULT 'generic'",
        "ALTER TABLE relationships ADD COLUMN confidence DOUBLE NOT NULL DEFAULT 0.8",
        "ALTER TABLE relationships ADD COLUMN weight DOUBLE NOT NULL DEFAULT 0.0",
        "CREATE INDEX idx_entities_canonical_id ON entities (canonical_id)",
        "CREATE INDEX idx_relationships_type ON relationships (relationship_type)",
        "CREATE INDEX idx_relationships_weight ON relationships (weight DESC)",
    ],
};

/// All migrations in apply order.
pub fn all() -> Vec<Migration> {
    vec![TYPED_WEIGHTED_GRAPH]
}

/// Migrations not yet recorded in `applied`.
pub fn pending(applied: &[String]) -> Vec<Migration> {
    all()
        .into_iter()
        .filter(|m| !applied.iter().any(|v| v == m.version))
        .collect()
}

/// Apply every pending migration through the database handle. Returns how
/// many were applied.
pub async fn apply_all<D: GraphDatabase>(db: &D) -> Result<usize, StorageError> {
    let already = db.applied_migrations().await?;
    let mut count = 0;

    for migration in pending(&already) {
        if db.apply_migration(&migration).await? {
            info!(
                "applied migration {}: {}",
                migration.version, migration.description
            );
            count += 1;
        }
    }

    if count == 0 {
        info!("database schema is up to date");
    }
    Ok(count)
}
