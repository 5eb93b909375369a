//! Memory database module - SQLite-backed storage for sessions, observations,
//! learnings, mutations and context snapshots
pub mod learning_store;
pub mod migration;
pub mod mutation_store;
pub mod observation_store;
pub mod schema;
pub mod session_store;
pub mod snapshot_store;
pub mod worker_store;

pub use learning_store::LearningStore;
pub use migration::MigrationManager;
pub use mutation_store::MutationStore;
pub use observation_store::{ErrorPatternRow, ObservationStore, ToolSuccessRow};
pub use schema::*;
pub use session_store::SessionStore;
pub use snapshot_store::SnapshotStore;
pub use worker_store::WorkerObservationStore;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

/// Handle to one store file. Every store shares the same connection pool.
pub struct MemoryDatabase {
    pub sessions: SessionStore,
    pub observations: ObservationStore,
    pub learnings: LearningStore,
    pub mutations: MutationStore,
    pub snapshots: SnapshotStore,
    pub worker: WorkerObservationStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
    path: Option<PathBuf>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        Self::open(db_path, DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Opens (creating if needed) the store at `db_path` and brings its schema up to date.
    pub fn open(db_path: &Path, max_payload_bytes: usize) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;
                     PRAGMA synchronous = NORMAL;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Memory database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool), max_payload_bytes, Some(db_path.to_path_buf())))
    }

    /// A private in-memory store. Every pooled connection to `:memory:` is its
    /// own database, so the pool holds exactly one connection that never expires.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool), DEFAULT_MAX_PAYLOAD_BYTES, None))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>, max_payload_bytes: usize, path: Option<PathBuf>) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&pool)),
            observations: ObservationStore::new(Arc::clone(&pool), max_payload_bytes),
            learnings: LearningStore::new(Arc::clone(&pool)),
            mutations: MutationStore::new(Arc::clone(&pool)),
            snapshots: SnapshotStore::new(Arc::clone(&pool)),
            worker: WorkerObservationStore::new(Arc::clone(&pool)),
            pool,
            path,
        }
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn statistics(&self) -> anyhow::Result<MemoryStatistics> {
        let conn = self.pool.get()?;
        Ok(migration::get_memory_statistics(&conn)?)
    }

    pub fn schema_version(&self) -> anyhow::Result<i32> {
        let mut conn = self.pool.get()?;
        Ok(MigrationManager::new(&mut conn).get_current_version()?)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if self.path.is_some() {
            if let Ok(conn) = self.pool.get() {
                let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".agent").join("brain").join("memory.db");

        let session_id = {
            let db = MemoryDatabase::new(&db_path).unwrap();
            assert_eq!(db.path(), Some(db_path.as_path()));
            db.sessions.create_session("/repo", "persist me", None).unwrap().session_id
        };

        let reopened = MemoryDatabase::new(&db_path).unwrap();
        assert_eq!(reopened.schema_version().unwrap(), migration::latest_version());
        assert!(reopened.sessions.get_session(&session_id).unwrap().is_some());
    }

    #[test]
    fn test_statistics() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let a = db.sessions.create_session("/a", "t", None).unwrap();
        let b = db.sessions.create_session("/b", "t", None).unwrap();
        db.sessions.create_session("/b", "t", None).unwrap();
        db.sessions.finalize_session(&a.session_id, "ok", 0.9, 10).unwrap();
        db.sessions.finalize_session(&b.session_id, "meh", 0.4, 10).unwrap();
        db.observations
            .append(NewObservation {
                session_id: &a.session_id,
                tool_name: "read_file",
                input: "/a",
                output: "",
                context: "",
                execution_time_ms: 1,
                success: true,
            })
            .unwrap();
        db.learnings.upsert("p", "d", 0.5, &[]).unwrap();

        let stats = db.statistics().unwrap();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.total_observations, 1);
        assert_eq!(stats.total_learnings, 1);
        assert_eq!(stats.total_mutations, 0);
        assert_eq!(stats.unique_projects, 2);
        assert_eq!(stats.avg_success_score, 0.65);
    }

    #[test]
    fn test_observation_for_unknown_session_is_rejected() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let result = db.observations.append(NewObservation {
            session_id: "missing",
            tool_name: "read_file",
            input: "",
            output: "",
            context: "",
            execution_time_ms: 0,
            success: true,
        });
        assert!(result.is_err());
        assert_eq!(db.statistics().unwrap().total_observations, 0);
    }
}
