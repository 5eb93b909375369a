//! Context snapshots: capture critical facts before a conversation is
//! compacted and score them for later retrieval.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context_engine::fact_extractor::FactExtractor;
use crate::error::MemoryError;
use crate::memory_db::{ContextSnapshot, CriticalFacts, MemoryDatabase};
use crate::utils::TextUtils;

pub const BASE_PRIORITY: u8 = 5;
pub const BLOCKER_BONUS: u8 = 2;
pub const MAX_OVERLAP_BONUS: usize = 3;
pub const MAX_PRIORITY: u8 = 10;

pub struct ContextSnapshotManager {
    database: Arc<MemoryDatabase>,
    extractor: FactExtractor,
}

impl ContextSnapshotManager {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            extractor: FactExtractor::new(),
        }
    }

    pub fn extract(&self, conversation: &str) -> CriticalFacts {
        self.extractor.extract(conversation)
    }

    /// Persist `facts` for `session_id`. Priorities above the ceiling are rejected.
    pub fn flush(&self, session_id: &str, facts: &CriticalFacts, priority: u8) -> anyhow::Result<ContextSnapshot> {
        if priority > MAX_PRIORITY {
            return Err(MemoryError::malformed(format!(
                "retrieval priority must be within 0..={}, got {}",
                MAX_PRIORITY, priority
            ))
            .into());
        }
        let snapshot = self.database.snapshots.insert(session_id, facts, priority)?;
        info!("Flushed context snapshot {} for session {}", snapshot.snapshot_id, session_id);
        Ok(snapshot)
    }

    /// Same as [`flush`](Self::flush) for caller-supplied JSON. Nothing is
    /// written when the JSON does not describe a fact bundle.
    pub fn flush_json(&self, session_id: &str, facts_json: &str, priority: u8) -> anyhow::Result<ContextSnapshot> {
        let facts: CriticalFacts = serde_json::from_str(facts_json)
            .map_err(|e| MemoryError::malformed(format!("invalid critical facts JSON: {}", e)))?;
        self.flush(session_id, &facts, priority)
    }

    pub fn load(&self, session_id: &str) -> anyhow::Result<Option<ContextSnapshot>> {
        self.database.snapshots.latest(session_id)
    }

    /// Recent snapshots with priorities recomputed against `current_task`.
    pub fn recent(
        &self,
        project_path: Option<&str>,
        current_task: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<ContextSnapshot>> {
        let mut snapshots = self.database.snapshots.recent(project_path, limit)?;
        for snapshot in &mut snapshots {
            snapshot.retrieval_priority = calculate_retrieval_priority(&snapshot.critical_facts, current_task);
        }
        debug!("Loaded {} recent snapshots", snapshots.len());
        Ok(snapshots)
    }
}

/// Base 5, +2 when blockers are present, +1 per word shared between the
/// current task and the snapshot's state, decisions and findings (at most 3),
/// never above 10.
pub fn calculate_retrieval_priority(facts: &CriticalFacts, current_task: Option<&str>) -> u8 {
    let mut priority = BASE_PRIORITY;

    if !facts.blockers.is_empty() {
        priority += BLOCKER_BONUS;
    }

    if let Some(task) = current_task {
        let task_words = TextUtils::word_set(task);
        let mut snapshot_text = facts.task_state.clone();
        for note in facts.decisions.iter().chain(facts.key_findings.iter()) {
            snapshot_text.push(' ');
            snapshot_text.push_str(note);
        }
        let snapshot_words = TextUtils::word_set(&snapshot_text);
        let overlap = task_words.intersection(&snapshot_words).count().min(MAX_OVERLAP_BONUS);
        priority += overlap as u8;
    }

    priority.min(MAX_PRIORITY)
}
