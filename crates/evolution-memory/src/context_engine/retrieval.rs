//! Assembles historical context for a task that is about to start.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context_engine::snapshot::ContextSnapshotManager;
use crate::memory_db::{ContextSnapshot, Learning, MemoryDatabase, Session};

pub const DEFAULT_RETRIEVAL_LIMIT: usize = 5;
/// Learnings at or above this confidence surface regardless of the task.
pub const ALWAYS_SURFACE_CONFIDENCE: f64 = 0.8;
pub const SUGGESTION_MIN_SCORE: f64 = 0.7;
pub const MAX_SUGGESTED_APPROACHES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub project_path: String,
    pub task_description: Option<String>,
    pub similar_sessions: Vec<Session>,
    pub relevant_learnings: Vec<Learning>,
    pub suggested_approaches: Vec<String>,
    pub recent_snapshots: Vec<ContextSnapshot>,
    pub context_injected: bool,
}

pub struct RetrievalEngine {
    database: Arc<MemoryDatabase>,
    snapshots: ContextSnapshotManager,
    default_limit: usize,
}

impl RetrievalEngine {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self::with_limit(database, DEFAULT_RETRIEVAL_LIMIT)
    }

    pub fn with_limit(database: Arc<MemoryDatabase>, default_limit: usize) -> Self {
        Self {
            snapshots: ContextSnapshotManager::new(Arc::clone(&database)),
            database,
            default_limit,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Build the context bundle for `project_path`. Returns an empty bundle,
    /// never an error, when the store has nothing relevant.
    pub fn load_context(
        &self,
        project_path: &str,
        task_description: Option<&str>,
        limit: Option<usize>,
    ) -> anyhow::Result<ContextBundle> {
        let limit = limit.unwrap_or(self.default_limit);
        let task = task_description.map(str::trim).filter(|t| !t.is_empty());

        let similar_sessions = self.similar_sessions(project_path, task, limit)?;
        let relevant_learnings = self.relevant_learnings(task, limit)?;
        let suggested_approaches = self.database.sessions.successful_summaries(
            project_path,
            SUGGESTION_MIN_SCORE,
            MAX_SUGGESTED_APPROACHES,
        )?;
        let recent_snapshots = self.snapshots.recent(Some(project_path), task, limit)?;

        let context_injected = !similar_sessions.is_empty() || !relevant_learnings.is_empty();
        info!(
            "Loaded context for {}: {} sessions, {} learnings, {} approaches",
            project_path,
            similar_sessions.len(),
            relevant_learnings.len(),
            suggested_approaches.len()
        );

        Ok(ContextBundle {
            project_path: project_path.to_string(),
            task_description: task.map(str::to_string),
            similar_sessions,
            relevant_learnings,
            suggested_approaches,
            recent_snapshots,
            context_injected,
        })
    }

    /// Same-project sessions newest first, followed by full-text matches not
    /// already present.
    fn similar_sessions(&self, project_path: &str, task: Option<&str>, limit: usize) -> anyhow::Result<Vec<Session>> {
        let mut sessions = self.database.sessions.recent_for_project(project_path, limit)?;

        if let Some(task) = task {
            let mut seen: HashSet<String> = sessions.iter().map(|s| s.session_id.clone()).collect();
            let matches = self.database.sessions.search(task, limit)?;
            debug!("Full-text session matches for task: {}", matches.len());
            for session in matches {
                if seen.insert(session.session_id.clone()) {
                    sessions.push(session);
                }
            }
        }

        Ok(sessions)
    }

    /// Task matches united with always-surface learnings, most confident
    /// first, then most frequent.
    fn relevant_learnings(&self, task: Option<&str>, limit: usize) -> anyhow::Result<Vec<Learning>> {
        let mut learnings = match task {
            Some(task) => self.database.learnings.search(task, limit)?,
            None => Vec::new(),
        };

        let mut seen: HashSet<String> = learnings.iter().map(|l| l.learning_id.clone()).collect();
        for learning in self.database.learnings.high_confidence(ALWAYS_SURFACE_CONFIDENCE, limit)? {
            if seen.insert(learning.learning_id.clone()) {
                learnings.push(learning);
            }
        }

        learnings.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then_with(|| b.frequency.cmp(&a.frequency))
        });
        Ok(learnings)
    }
}
