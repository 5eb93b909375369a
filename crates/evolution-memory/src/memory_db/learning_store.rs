//! Cross-session learnings, one row per pattern type

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::memory_db::schema::*;
use crate::utils::TextUtils;

const LEARNING_COLUMNS: &str = "l.learning_id, l.pattern_type, l.description, l.frequency, \
     l.confidence_score, l.created_at, l.updated_at, l.source_sessions, l.cross_project_refs";

pub struct LearningStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl LearningStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Inserts a new learning with frequency 1, or bumps the frequency of the
    /// existing row for `pattern_type` and refreshes its confidence.
    pub fn upsert(
        &self,
        pattern_type: &str,
        description: &str,
        confidence: f64,
        source_sessions: &[String],
    ) -> anyhow::Result<Learning> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let (_, now_str) = now_timestamp();

        let existing = tx
            .query_row(
                "SELECT learning_id, source_sessions FROM learnings WHERE pattern_type = ?1",
                [pattern_type],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let learning_id = match existing {
            Some((learning_id, sources_json)) => {
                let mut sources: Vec<String> = serde_json::from_str(&sources_json).unwrap_or_default();
                for session in source_sessions {
                    if !sources.contains(session) {
                        sources.push(session.clone());
                    }
                }
                tx.execute(
                    "UPDATE learnings
                     SET frequency = frequency + 1, confidence_score = ?1, updated_at = ?2,
                         source_sessions = ?3
                     WHERE learning_id = ?4",
                    params![confidence, &now_str, serde_json::to_string(&sources)?, &learning_id],
                )?;
                debug!("Reinforced learning {} ({})", learning_id, pattern_type);
                learning_id
            }
            None => {
                let learning_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO learnings
                     (learning_id, created_at, updated_at, pattern_type, description,
                      frequency, confidence_score, source_sessions)
                     VALUES (?1, ?2, ?2, ?3, ?4, 1, ?5, ?6)",
                    params![
                        &learning_id,
                        &now_str,
                        pattern_type,
                        description,
                        confidence,
                        serde_json::to_string(source_sessions)?,
                    ],
                )?;
                info!("Recorded new learning {} ({})", learning_id, pattern_type);
                learning_id
            }
        };

        let learning = tx.query_row(
            &format!("SELECT {} FROM learnings l WHERE l.learning_id = ?1", LEARNING_COLUMNS),
            [&learning_id],
            |row| Ok(self.row_to_learning(row)),
        )??;
        tx.commit()?;
        Ok(learning)
    }

    pub fn get_by_pattern(&self, pattern_type: &str) -> anyhow::Result<Option<Learning>> {
        let conn = self.get_conn()?;
        let learning = conn
            .query_row(
                &format!("SELECT {} FROM learnings l WHERE l.pattern_type = ?1", LEARNING_COLUMNS),
                [pattern_type],
                |row| Ok(self.row_to_learning(row)),
            )
            .optional()?;
        learning.transpose()
    }

    /// Adds `by` to a learning's frequency. Returns rows changed.
    pub fn increment_frequency(&self, learning_id: &str, by: i64) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE learnings SET frequency = frequency + ?1, updated_at = ?2 WHERE learning_id = ?3",
            params![by, format_timestamp(&Utc::now()), learning_id],
        )?;
        Ok(updated)
    }

    /// Full-text search over pattern types and descriptions, best match first.
    pub fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Learning>> {
        let Some(expression) = TextUtils::fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        self.query_learnings(
            &format!(
                "SELECT {} FROM learnings_fts
                 JOIN learnings l ON l.rowid = learnings_fts.rowid
                 WHERE learnings_fts MATCH ?1
                 ORDER BY bm25(learnings_fts), l.confidence_score DESC, l.frequency DESC
                 LIMIT ?2",
                LEARNING_COLUMNS
            ),
            params![expression, limit as i64],
        )
    }

    /// Learnings at or above `min_confidence`. The limit keeps the most
    /// frequent ones; callers re-sort for display.
    pub fn high_confidence(&self, min_confidence: f64, limit: usize) -> anyhow::Result<Vec<Learning>> {
        self.query_learnings(
            &format!(
                "SELECT {} FROM learnings l
                 WHERE l.confidence_score >= ?1
                 ORDER BY l.frequency DESC, l.confidence_score DESC
                 LIMIT ?2",
                LEARNING_COLUMNS
            ),
            params![min_confidence, limit as i64],
        )
    }

    /// Learnings meeting both thresholds, most frequent first.
    pub fn established(&self, min_confidence: f64, min_frequency: i64, limit: usize) -> anyhow::Result<Vec<Learning>> {
        self.query_learnings(
            &format!(
                "SELECT {} FROM learnings l
                 WHERE l.confidence_score >= ?1 AND l.frequency >= ?2
                 ORDER BY l.frequency DESC, l.confidence_score DESC
                 LIMIT ?3",
                LEARNING_COLUMNS
            ),
            params![min_confidence, min_frequency, limit as i64],
        )
    }

    pub fn all(&self) -> anyhow::Result<Vec<Learning>> {
        self.query_learnings(
            &format!(
                "SELECT {} FROM learnings l ORDER BY l.frequency DESC, l.confidence_score DESC",
                LEARNING_COLUMNS
            ),
            [],
        )
    }

    fn query_learnings<P: rusqlite::Params>(&self, sql: &str, params: P) -> anyhow::Result<Vec<Learning>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut learnings = Vec::new();
        while let Some(row) = rows.next()? {
            learnings.push(self.row_to_learning(row)?);
        }
        Ok(learnings)
    }

    fn row_to_learning(&self, row: &Row) -> anyhow::Result<Learning> {
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;
        let sources_json: String = row.get(7)?;
        let refs_json: String = row.get(8)?;

        Ok(Learning {
            learning_id: row.get(0)?,
            pattern_type: row.get(1)?,
            description: row.get(2)?,
            frequency: row.get(3)?,
            confidence_score: row.get(4)?,
            created_at: parse_datetime_safe(&created_at_str).unwrap_or_else(Utc::now),
            updated_at: parse_datetime_safe(&updated_at_str).unwrap_or_else(Utc::now),
            source_sessions: serde_json::from_str(&sources_json).unwrap_or_default(),
            cross_project_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
        })
    }
}
