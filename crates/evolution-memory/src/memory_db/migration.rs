//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{debug, error, info};

use crate::memory_db::schema::MemoryStatistics;

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to the latest version. Safe to call on every open.
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        debug!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;
        }

        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_fts_indexes.sql")),
        (3, include_str!("migrations/003_worker_observations.sql")),
    ]
}

pub fn latest_version() -> i32 {
    get_migrations().last().map(|(v, _)| *v).unwrap_or(0)
}

/// Aggregate counts over the store. Read-only.
pub fn get_memory_statistics(conn: &Connection) -> Result<MemoryStatistics> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
    }

    let unique_projects: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT project_path) FROM sessions",
        [],
        |row| row.get(0),
    )?;

    let avg_success: Option<f64> = conn.query_row(
        "SELECT AVG(success_score) FROM sessions WHERE success_score > 0",
        [],
        |row| row.get(0),
    )?;

    Ok(MemoryStatistics {
        total_sessions: get_table_count(conn, "sessions")?,
        total_observations: get_table_count(conn, "observations")?,
        total_mutations: get_table_count(conn, "mutations")?,
        total_learnings: get_table_count(conn, "learnings")?,
        unique_projects,
        avg_success_score: avg_success.map(round2).unwrap_or(0.0),
    })
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
