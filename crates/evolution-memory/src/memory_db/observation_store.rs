//! Append-only observation log plus the cross-session aggregates built on it

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::memory_db::schema::*;
use crate::utils::TextUtils;

const OBSERVATION_COLUMNS: &str = "o.observation_id, o.session_id, o.timestamp, o.tool_name, \
     o.input_data, o.output_data, o.context, o.execution_time_ms, o.success";

/// Failed invocations sharing a tool and input prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPatternRow {
    pub tool_name: String,
    pub input_prefix: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSuccessRow {
    pub tool_name: String,
    pub total_uses: i64,
    pub success_rate: f64,
}

pub struct ObservationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
    max_payload_bytes: usize,
}

impl ObservationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>, max_payload_bytes: usize) -> Self {
        Self { pool, max_payload_bytes }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Records one tool invocation. Input and output are cut to the payload budget.
    pub fn append(&self, observation: NewObservation<'_>) -> anyhow::Result<Observation> {
        let observation_id = Uuid::new_v4().to_string();
        let (now, now_str) = now_timestamp();
        let input = TextUtils::truncate_to_bytes(observation.input, self.max_payload_bytes);
        let output = TextUtils::truncate_to_bytes(observation.output, self.max_payload_bytes);
        let execution_time_ms = i64::try_from(observation.execution_time_ms).unwrap_or(i64::MAX);

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO observations
             (observation_id, session_id, timestamp, tool_name, input_data, output_data,
              context, execution_time_ms, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &observation_id,
                observation.session_id,
                &now_str,
                observation.tool_name,
                input.as_ref(),
                output.as_ref(),
                observation.context,
                execution_time_ms,
                observation.success,
            ],
        )?;

        debug!(
            "Stored observation {} ({}) for session {}",
            observation_id, observation.tool_name, observation.session_id
        );
        Ok(Observation {
            observation_id,
            session_id: observation.session_id.to_string(),
            timestamp: now,
            tool_name: observation.tool_name.to_string(),
            input_data: input.into_owned(),
            output_data: output.into_owned(),
            context: observation.context.to_string(),
            execution_time_ms,
            success: observation.success,
        })
    }

    /// Every observation of a session in recording order.
    pub fn session_observations(&self, session_id: &str) -> anyhow::Result<Vec<Observation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM observations o
             WHERE o.session_id = ?1
             ORDER BY o.timestamp ASC, o.rowid ASC",
            OBSERVATION_COLUMNS
        ))?;

        let mut rows = stmt.query([session_id])?;
        let mut observations = Vec::new();
        while let Some(row) = rows.next()? {
            observations.push(self.row_to_observation(row)?);
        }
        Ok(observations)
    }

    /// Full-text search over tool names and context notes.
    pub fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Observation>> {
        let Some(expression) = TextUtils::fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM observations_fts
             JOIN observations o ON o.rowid = observations_fts.rowid
             WHERE observations_fts MATCH ?1
             ORDER BY bm25(observations_fts), o.timestamp DESC
             LIMIT ?2",
            OBSERVATION_COLUMNS
        ))?;

        let mut rows = stmt.query(params![expression, limit as i64])?;
        let mut observations = Vec::new();
        while let Some(row) = rows.next()? {
            observations.push(self.row_to_observation(row)?);
        }
        Ok(observations)
    }

    /// Tool names of a session in order, at most `limit` of them when given.
    pub fn tool_sequence(&self, session_id: &str, limit: Option<usize>) -> anyhow::Result<Vec<String>> {
        // a negative LIMIT is unbounded in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT tool_name FROM observations
             WHERE session_id = ?1
             ORDER BY timestamp ASC, rowid ASC
             LIMIT ?2",
        )?;
        let tools = stmt
            .query_map(params![session_id, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tools)
    }

    /// Failed invocations repeated more than once with the same tool and input.
    pub fn repeated_errors(&self, path_prefix: Option<&str>, limit: usize) -> anyhow::Result<Vec<ErrorPatternRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT o.tool_name, o.input_data, COUNT(*) AS occurrences
             FROM observations o
             JOIN sessions s ON s.session_id = o.session_id
             WHERE o.success = 0
               AND (?1 IS NULL OR substr(s.project_path, 1, length(?1)) = ?1)
             GROUP BY o.tool_name, o.input_data
             HAVING occurrences > 1
             ORDER BY occurrences DESC, o.tool_name ASC
             LIMIT ?2",
        )?;

        let mut rows = stmt.query(params![path_prefix, limit as i64])?;
        let mut patterns = Vec::new();
        while let Some(row) = rows.next()? {
            let input: String = row.get(1)?;
            patterns.push(ErrorPatternRow {
                tool_name: row.get(0)?,
                input_prefix: TextUtils::first_chars(&input, 100).to_string(),
                count: row.get(2)?,
            });
        }
        Ok(patterns)
    }

    /// Success rate of every tool used more than `min_uses` times.
    pub fn tool_success_metrics(&self, path_prefix: Option<&str>, min_uses: i64) -> anyhow::Result<Vec<ToolSuccessRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT o.tool_name, COUNT(*) AS total, AVG(CAST(o.success AS REAL)) AS rate
             FROM observations o
             JOIN sessions s ON s.session_id = o.session_id
             WHERE ?1 IS NULL OR substr(s.project_path, 1, length(?1)) = ?1
             GROUP BY o.tool_name
             HAVING total > ?2
             ORDER BY total DESC, o.tool_name ASC",
        )?;

        let metrics = stmt
            .query_map(params![path_prefix, min_uses], |row| {
                Ok(ToolSuccessRow {
                    tool_name: row.get(0)?,
                    total_uses: row.get(1)?,
                    success_rate: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(metrics)
    }

    /// Tools with at least `min_failures` failed invocations, most failing first.
    pub fn failing_tools(&self, min_failures: i64, limit: usize) -> anyhow::Result<Vec<(String, i64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT tool_name, COUNT(*) AS failures
             FROM observations
             WHERE success = 0
             GROUP BY tool_name
             HAVING failures >= ?1
             ORDER BY failures DESC, tool_name ASC
             LIMIT ?2",
        )?;
        let tools = stmt
            .query_map(params![min_failures, limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
        Ok(tools)
    }

    fn row_to_observation(&self, row: &Row) -> anyhow::Result<Observation> {
        let timestamp_str: String = row.get(2)?;
        Ok(Observation {
            observation_id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: parse_datetime_safe(&timestamp_str).unwrap_or_else(Utc::now),
            tool_name: row.get(3)?,
            input_data: row.get(4)?,
            output_data: row.get(5)?,
            context: row.get(6)?,
            execution_time_ms: row.get(7)?,
            success: row.get(8)?,
        })
    }
}
