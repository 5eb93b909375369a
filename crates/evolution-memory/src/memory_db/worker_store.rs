//! Enriched observations received by the HTTP worker

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

use crate::memory_db::schema::*;

pub struct WorkerObservationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl WorkerObservationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn insert(
        &self,
        session_id: &str,
        title: &str,
        semantic_summary: &str,
        observation_json: &str,
    ) -> anyhow::Result<WorkerObservation> {
        let (now, now_str) = now_timestamp();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO worker_observations (session_id, timestamp, title, semantic_summary, observation_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, &now_str, title, semantic_summary, observation_json],
        )?;

        Ok(WorkerObservation {
            id: conn.last_insert_rowid(),
            session_id: session_id.to_string(),
            timestamp: now,
            title: title.to_string(),
            semantic_summary: semantic_summary.to_string(),
            observation_json: observation_json.to_string(),
        })
    }

    pub fn get(&self, id: i64) -> anyhow::Result<Option<WorkerObservation>> {
        let conn = self.get_conn()?;
        let observation = conn
            .query_row(
                "SELECT id, session_id, timestamp, title, semantic_summary, observation_json
                 FROM worker_observations WHERE id = ?1",
                [id],
                |row| Ok(self.row_to_observation(row)),
            )
            .optional()?;
        observation.transpose()
    }

    /// Every stored observation, oldest first. Used to rebuild the similarity index.
    pub fn all(&self) -> anyhow::Result<Vec<WorkerObservation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, timestamp, title, semantic_summary, observation_json
             FROM worker_observations ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut observations = Vec::new();
        while let Some(row) = rows.next()? {
            observations.push(self.row_to_observation(row)?);
        }
        Ok(observations)
    }

    fn row_to_observation(&self, row: &Row) -> anyhow::Result<WorkerObservation> {
        let timestamp_str: String = row.get(2)?;
        Ok(WorkerObservation {
            id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: parse_datetime_safe(&timestamp_str).unwrap_or_else(Utc::now),
            title: row.get(3)?,
            semantic_summary: row.get(4)?,
            observation_json: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::memory_db::MemoryDatabase;

    #[test]
    fn test_insert_and_get() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let stored = db.worker.insert("s1", "Read config", "Looked at settings", r#"{"tool_name":"Read"}"#).unwrap();
        assert!(stored.id > 0);

        let loaded = db.worker.get(stored.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Read config");
        assert_eq!(loaded.observation_json, r#"{"tool_name":"Read"}"#);
        assert!(db.worker.get(stored.id + 100).unwrap().is_none());
        assert_eq!(db.worker.all().unwrap().len(), 1);
    }
}
