//! Session storage: creation, finalization and full-text lookup

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::memory_db::schema::*;
use crate::utils::TextUtils;

const SESSION_COLUMNS: &str = "s.session_id, s.project_path, s.start_time, s.end_time, \
     s.task_description, s.summary, s.success_score, s.token_usage, s.conversation_id";

pub struct SessionStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SessionStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn create_session(
        &self,
        project_path: &str,
        task_description: &str,
        conversation_id: Option<&str>,
    ) -> anyhow::Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sessions (session_id, project_path, start_time, task_description, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&session_id, project_path, &now_str, task_description, conversation_id],
        )?;

        info!("Created session {} for project {}", session_id, project_path);
        Ok(Session {
            session_id,
            project_path: project_path.to_string(),
            start_time: now,
            end_time: None,
            task_description: task_description.to_string(),
            summary: None,
            success_score: 0.0,
            token_usage: 0,
            conversation_id: conversation_id.map(str::to_string),
        })
    }

    pub fn get_session(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        let conn = self.get_conn()?;
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions s WHERE s.session_id = ?1", SESSION_COLUMNS),
                [session_id],
                |row| Ok(self.row_to_session(row)),
            )
            .optional()?;
        session.transpose()
    }

    /// Sets end time, summary, score and token usage. A session is finalized
    /// at most once; returns the number of rows changed, so zero means the
    /// session is unknown or already finalized.
    pub fn finalize_session(
        &self,
        session_id: &str,
        summary: &str,
        success_score: f64,
        token_usage: u64,
    ) -> anyhow::Result<usize> {
        if !(0.0..=1.0).contains(&success_score) {
            return Err(MemoryError::malformed(format!(
                "success score must be within [0, 1], got {}",
                success_score
            ))
            .into());
        }
        let token_usage = i64::try_from(token_usage)
            .map_err(|_| MemoryError::malformed("token usage out of range"))?;

        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE sessions
             SET end_time = ?1, summary = ?2, success_score = ?3, token_usage = ?4
             WHERE session_id = ?5 AND end_time IS NULL",
            params![format_timestamp(&Utc::now()), summary, success_score, token_usage, session_id],
        )?;

        if updated > 0 {
            info!("Finalized session {} (score {:.2})", session_id, success_score);
        } else {
            debug!("Finalize of session {} changed no rows", session_id);
        }
        Ok(updated)
    }

    pub fn recent_for_project(&self, project_path: &str, limit: usize) -> anyhow::Result<Vec<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions s
             WHERE s.project_path = ?1
             ORDER BY s.start_time DESC, s.rowid DESC
             LIMIT ?2",
            SESSION_COLUMNS
        ))?;

        let mut rows = stmt.query(params![project_path, limit as i64])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(self.row_to_session(row)?);
        }
        Ok(sessions)
    }

    /// Full-text search over summaries and task descriptions, best match first
    /// and newest first among equal matches.
    pub fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Session>> {
        let Some(expression) = TextUtils::fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions_fts
             JOIN sessions s ON s.rowid = sessions_fts.rowid
             WHERE sessions_fts MATCH ?1
             ORDER BY bm25(sessions_fts), s.start_time DESC, s.rowid DESC
             LIMIT ?2",
            SESSION_COLUMNS
        ))?;

        let mut rows = stmt.query(params![expression, limit as i64])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(self.row_to_session(row)?);
        }
        debug!("Session search '{}' matched {} sessions", query, sessions.len());
        Ok(sessions)
    }

    /// Distinct summaries of sessions on `project_path` scoring at least `min_score`.
    pub fn successful_summaries(
        &self,
        project_path: &str,
        min_score: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT summary FROM sessions
             WHERE project_path = ?1 AND success_score >= ?2 AND summary IS NOT NULL
             GROUP BY summary
             ORDER BY MAX(success_score) DESC
             LIMIT ?3",
        )?;

        let summaries = stmt
            .query_map(params![project_path, min_score, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(summaries)
    }

    /// Ids of every session, optionally restricted to projects under `path_prefix`.
    pub fn session_ids(&self, path_prefix: Option<&str>) -> anyhow::Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM sessions
             WHERE ?1 IS NULL OR substr(project_path, 1, length(?1)) = ?1
             ORDER BY start_time ASC, rowid ASC",
        )?;
        let ids = stmt
            .query_map([path_prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn count_projects(&self, path_prefix: Option<&str>) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT project_path) FROM sessions
             WHERE ?1 IS NULL OR substr(project_path, 1, length(?1)) = ?1",
            [path_prefix],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_session(&self, row: &Row) -> anyhow::Result<Session> {
        let start_time_str: String = row.get(2)?;
        let end_time_str: Option<String> = row.get(3)?;

        Ok(Session {
            session_id: row.get(0)?,
            project_path: row.get(1)?,
            start_time: parse_datetime_safe(&start_time_str).unwrap_or_else(Utc::now),
            end_time: end_time_str.as_deref().and_then(parse_datetime_safe),
            task_description: row.get(4)?,
            summary: row.get(5)?,
            success_score: row.get(6)?,
            token_usage: row.get(7)?,
            conversation_id: row.get(8)?,
        })
    }
}
