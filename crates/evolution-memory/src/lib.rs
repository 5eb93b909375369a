// evolution-memory/src/lib.rs

pub mod config;
pub mod context_engine;
pub mod enrichment;
pub mod error;
pub mod evolution;
pub mod ingest;
pub mod memory_db;
pub mod session_pointer;
pub mod similarity;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod metrics;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use config::Config;
pub use context_engine::{ContextBundle, ContextSnapshotManager, FactExtractor, RetrievalEngine};
pub use error::MemoryError;
pub use evolution::{InefficiencyAnalyzer, MutationConfig, MutationLifecycleManager, PatternAggregator};
pub use memory_db::MemoryDatabase;
pub use session_pointer::SessionPointer;

#[cfg(feature = "cli")]
pub use server::run_worker_server;
