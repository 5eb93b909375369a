//! Context engine module - retrieval of prior experience and context snapshots

pub mod fact_extractor;
pub mod retrieval;
pub mod snapshot;

pub use fact_extractor::FactExtractor;
pub use retrieval::{ContextBundle, RetrievalEngine, DEFAULT_RETRIEVAL_LIMIT};
pub use snapshot::{calculate_retrieval_priority, ContextSnapshotManager};
