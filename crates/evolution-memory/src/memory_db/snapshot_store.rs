//! Context snapshot persistence

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::memory_db::schema::*;

const SNAPSHOT_COLUMNS: &str = "c.snapshot_id, c.session_id, c.timestamp, c.critical_facts, c.retrieval_priority";

pub struct SnapshotStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SnapshotStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn insert(&self, session_id: &str, facts: &CriticalFacts, priority: u8) -> anyhow::Result<ContextSnapshot> {
        let snapshot_id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        let facts_json = serde_json::to_string(facts)?;
        let priority = priority.min(10);

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO context_snapshots (snapshot_id, session_id, timestamp, critical_facts, retrieval_priority)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&snapshot_id, session_id, &now_str, &facts_json, priority],
        )?;

        debug!("Stored snapshot {} for session {} (priority {})", snapshot_id, session_id, priority);
        Ok(ContextSnapshot {
            snapshot_id,
            session_id: session_id.to_string(),
            timestamp: now,
            critical_facts: facts.clone(),
            retrieval_priority: priority,
        })
    }

    pub fn latest(&self, session_id: &str) -> anyhow::Result<Option<ContextSnapshot>> {
        let conn = self.get_conn()?;
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM context_snapshots c
                     WHERE c.session_id = ?1
                     ORDER BY c.timestamp DESC, c.rowid DESC
                     LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                [session_id],
                |row| Ok(self.row_to_snapshot(row)),
            )
            .optional()?;
        snapshot.transpose()
    }

    /// Newest snapshots first, optionally only those of sessions on `project_path`.
    pub fn recent(&self, project_path: Option<&str>, limit: usize) -> anyhow::Result<Vec<ContextSnapshot>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM context_snapshots c
             JOIN sessions s ON s.session_id = c.session_id
             WHERE ?1 IS NULL OR s.project_path = ?1
             ORDER BY c.timestamp DESC, c.rowid DESC
             LIMIT ?2",
            SNAPSHOT_COLUMNS
        ))?;

        let mut rows = stmt.query(params![project_path, limit as i64])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(self.row_to_snapshot(row)?);
        }
        Ok(snapshots)
    }

    fn row_to_snapshot(&self, row: &Row) -> anyhow::Result<ContextSnapshot> {
        let timestamp_str: String = row.get(2)?;
        let facts_json: String = row.get(3)?;
        let priority: i64 = row.get(4)?;

        Ok(ContextSnapshot {
            snapshot_id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: parse_datetime_safe(&timestamp_str).unwrap_or_else(Utc::now),
            critical_facts: serde_json::from_str(&facts_json)?,
            retrieval_priority: priority.clamp(0, 10) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    #[test]
    fn test_latest_is_newest() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let session = db.sessions.create_session("/repo", "t", None).unwrap();
        assert!(db.snapshots.latest(&session.session_id).unwrap().is_none());

        let first = CriticalFacts { task_state: "first".into(), ..Default::default() };
        let second = CriticalFacts { task_state: "second".into(), ..Default::default() };
        db.snapshots.insert(&session.session_id, &first, 5).unwrap();
        db.snapshots.insert(&session.session_id, &second, 7).unwrap();

        let latest = db.snapshots.latest(&session.session_id).unwrap().unwrap();
        assert_eq!(latest.critical_facts.task_state, "second");
        assert_eq!(latest.retrieval_priority, 7);
    }

    #[test]
    fn test_recent_filters_by_project() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let a = db.sessions.create_session("/a", "t", None).unwrap();
        let b = db.sessions.create_session("/b", "t", None).unwrap();
        db.snapshots.insert(&a.session_id, &CriticalFacts::default(), 5).unwrap();
        db.snapshots.insert(&b.session_id, &CriticalFacts::default(), 5).unwrap();

        assert_eq!(db.snapshots.recent(None, 10).unwrap().len(), 2);
        let only_a = db.snapshots.recent(Some("/a"), 10).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].session_id, a.session_id);
    }

    #[test]
    fn test_priority_is_capped_on_insert() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let session = db.sessions.create_session("/repo", "t", None).unwrap();
        let snapshot = db.snapshots.insert(&session.session_id, &CriticalFacts::default(), 42).unwrap();
        assert_eq!(snapshot.retrieval_priority, 10);
    }
}
