pub mod cache;
pub mod normalize;
pub mod store;
pub mod types;

pub use store::{GraphStore, GraphStoreError, RelationshipOutcome};
pub use types::{Extraction, Provenance, RelationshipType};
