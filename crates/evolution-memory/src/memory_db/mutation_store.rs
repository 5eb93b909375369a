//! Proposed mutations and their apply/rollback state

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::memory_db::schema::*;

const MUTATION_COLUMNS: &str = "mutation_id, session_id, created_at, inefficiency_type, \
     mutation_strategy, confidence_score, applied, outcome, rollback_data";

pub struct MutationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MutationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn record(&self, mutation: &Mutation) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        insert_mutation(&conn, mutation)?;
        debug!("Recorded mutation {} ({})", mutation.mutation_id, mutation.inefficiency_type);
        Ok(())
    }

    /// Records a batch in one transaction. Either every mutation is stored
    /// or none is.
    pub fn record_all(&self, mutations: &[Mutation]) -> anyhow::Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for mutation in mutations {
            insert_mutation(&tx, mutation)?;
        }
        tx.commit()?;
        debug!("Recorded {} mutations", mutations.len());
        Ok(())
    }

    /// Flips the applied flag. Returns rows changed; zero means the id is unknown.
    pub fn set_applied(&self, mutation_id: &str, applied: bool, outcome: &str) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE mutations SET applied = ?1, outcome = ?2 WHERE mutation_id = ?3",
            params![applied, outcome, mutation_id],
        )?;
        Ok(updated)
    }

    pub fn get(&self, mutation_id: &str) -> anyhow::Result<Option<Mutation>> {
        let conn = self.get_conn()?;
        let mutation = conn
            .query_row(
                &format!("SELECT {} FROM mutations WHERE mutation_id = ?1", MUTATION_COLUMNS),
                [mutation_id],
                |row| Ok(self.row_to_mutation(row)),
            )
            .optional()?;
        mutation.transpose()
    }

    pub fn for_session(&self, session_id: &str) -> anyhow::Result<Vec<Mutation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mutations WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
            MUTATION_COLUMNS
        ))?;

        let mut rows = stmt.query([session_id])?;
        let mut mutations = Vec::new();
        while let Some(row) = rows.next()? {
            mutations.push(self.row_to_mutation(row)?);
        }
        Ok(mutations)
    }

    fn row_to_mutation(&self, row: &Row) -> anyhow::Result<Mutation> {
        let created_at_str: String = row.get(2)?;
        Ok(Mutation {
            mutation_id: row.get(0)?,
            session_id: row.get(1)?,
            created_at: parse_datetime_safe(&created_at_str).unwrap_or_else(Utc::now),
            inefficiency_type: row.get(3)?,
            mutation_strategy: row.get(4)?,
            confidence_score: row.get(5)?,
            applied: row.get(6)?,
            outcome: row.get(7)?,
            rollback_data: row.get(8)?,
        })
    }
}

fn insert_mutation(conn: &Connection, mutation: &Mutation) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO mutations
         (mutation_id, session_id, created_at, inefficiency_type, mutation_strategy,
          confidence_score, applied, outcome, rollback_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &mutation.mutation_id,
            &mutation.session_id,
            format_timestamp(&mutation.created_at),
            &mutation.inefficiency_type,
            &mutation.mutation_strategy,
            mutation.confidence_score,
            mutation.applied,
            &mutation.outcome,
            &mutation.rollback_data,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn sample(session_id: &str) -> Mutation {
        Mutation {
            mutation_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            inefficiency_type: "repeated_errors".into(),
            mutation_strategy: r#"{"action":"error_pattern_lookup","details":"x"}"#.into(),
            confidence_score: 0.9,
            applied: false,
            outcome: None,
            rollback_data: None,
        }
    }

    #[test]
    fn test_record_and_toggle() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let session = db.sessions.create_session("/repo", "t", None).unwrap();
        let mutation = sample(&session.session_id);
        db.mutations.record(&mutation).unwrap();

        let loaded = db.mutations.get(&mutation.mutation_id).unwrap().unwrap();
        assert_eq!(loaded.state(), MutationState::Proposed);

        assert_eq!(db.mutations.set_applied(&mutation.mutation_id, true, OUTCOME_APPLIED).unwrap(), 1);
        assert!(db.mutations.get(&mutation.mutation_id).unwrap().unwrap().applied);

        assert_eq!(db.mutations.set_applied(&mutation.mutation_id, false, OUTCOME_ROLLED_BACK).unwrap(), 1);
        let rolled = db.mutations.get(&mutation.mutation_id).unwrap().unwrap();
        assert_eq!(rolled.state(), MutationState::RolledBack);

        assert_eq!(db.mutations.set_applied("unknown", true, OUTCOME_APPLIED).unwrap(), 0);
        assert_eq!(db.mutations.for_session(&session.session_id).unwrap().len(), 1);
    }

    #[test]
    fn test_record_all_is_atomic() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let session = db.sessions.create_session("/repo", "t", None).unwrap();
        let first = sample(&session.session_id);
        let mut duplicate = sample(&session.session_id);
        duplicate.mutation_id = first.mutation_id.clone();

        assert!(db.mutations.record_all(&[first.clone(), duplicate]).is_err());
        assert!(db.mutations.for_session(&session.session_id).unwrap().is_empty());

        let second = sample(&session.session_id);
        db.mutations.record_all(&[first, second]).unwrap();
        assert_eq!(db.mutations.for_session(&session.session_id).unwrap().len(), 2);
        db.mutations.record_all(&[]).unwrap();
    }
}
