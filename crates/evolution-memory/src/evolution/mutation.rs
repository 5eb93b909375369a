//! Mutation lifecycle: turn inefficiencies into proposals, then apply or roll
//! them back. Proposed -> Applied -> RolledBack -> Applied ...

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::evolution::analyzer::{Inefficiency, InefficiencyAnalyzer, MutationStrategy, RuntimeAnalysis};
use crate::memory_db::{MemoryDatabase, Mutation, MutationState, OUTCOME_APPLIED, OUTCOME_ROLLED_BACK};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_MUTATIONS_PER_SESSION: usize = 3;
/// Checkpoints suggest strategies for anything at least this severe.
pub const CHECKPOINT_SUGGESTION_SEVERITY: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct MutationConfig {
    pub confidence_threshold: f64,
    pub max_mutations_per_session: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_mutations_per_session: DEFAULT_MAX_MUTATIONS_PER_SESSION,
        }
    }
}

/// Result of an apply or rollback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub success: bool,
    pub mutation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MutationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub session_id: String,
    pub analysis: RuntimeAnalysis,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_observations: usize,
    pub success_rate: f64,
    pub inefficiency_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointReport {
    pub checkpoint_step: u32,
    pub analysis_summary: AnalysisSummary,
    pub suggestions: Vec<MutationStrategy>,
}

pub struct MutationLifecycleManager {
    database: Arc<MemoryDatabase>,
    analyzer: InefficiencyAnalyzer,
    config: MutationConfig,
}

impl MutationLifecycleManager {
    pub fn new(database: Arc<MemoryDatabase>, config: MutationConfig) -> Self {
        Self {
            analyzer: InefficiencyAnalyzer::new(Arc::clone(&database)),
            database,
            config,
        }
    }

    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// One unapplied mutation per inefficiency at or above the confidence
    /// threshold, in input order, at most the per-session cap. Nothing is
    /// persisted.
    pub fn generate(&self, inefficiencies: &[Inefficiency], session_id: &str) -> Vec<Mutation> {
        inefficiencies
            .iter()
            .filter(|i| i.severity >= self.config.confidence_threshold)
            .take(self.config.max_mutations_per_session)
            .map(|i| Mutation {
                mutation_id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                created_at: Utc::now(),
                inefficiency_type: i.inefficiency_type.as_str().to_string(),
                mutation_strategy: json!({
                    "action": i.suggestion.as_str(),
                    "details": i.details,
                })
                .to_string(),
                confidence_score: i.severity,
                applied: false,
                outcome: None,
                rollback_data: None,
            })
            .collect()
    }

    /// Analyze a session, generate mutations and persist them.
    pub fn evolve(&self, session_id: &str) -> anyhow::Result<EvolutionReport> {
        let analysis = self.analyzer.analyze_session(session_id)?;
        let mutations = self.generate(&analysis.inefficiencies, session_id);
        self.database.mutations.record_all(&mutations)?;

        info!(
            "Session {}: {} inefficiencies, {} mutations proposed",
            session_id,
            analysis.inefficiencies.len(),
            mutations.len()
        );
        Ok(EvolutionReport {
            session_id: session_id.to_string(),
            analysis,
            mutations,
        })
    }

    /// Mark a mutation applied. Refuses unless `confirmed`.
    pub fn apply(&self, mutation_id: &str, confirmed: bool) -> anyhow::Result<MutationOutcome> {
        if !confirmed {
            return Err(MemoryError::ConfirmationRequired(mutation_id.to_string()).into());
        }
        self.transition(mutation_id, true, OUTCOME_APPLIED)
    }

    pub fn rollback(&self, mutation_id: &str) -> anyhow::Result<MutationOutcome> {
        self.transition(mutation_id, false, OUTCOME_ROLLED_BACK)
    }

    fn transition(&self, mutation_id: &str, applied: bool, outcome: &str) -> anyhow::Result<MutationOutcome> {
        let updated = self.database.mutations.set_applied(mutation_id, applied, outcome)?;
        if updated == 0 {
            debug!("Mutation {} not found, nothing to {}", mutation_id, outcome);
            return Ok(MutationOutcome {
                success: false,
                mutation_id: mutation_id.to_string(),
                state: None,
                error: Some(MemoryError::not_found("mutation", mutation_id).to_string()),
            });
        }

        info!("Mutation {} -> {}", mutation_id, outcome);
        let state = if applied { MutationState::Applied } else { MutationState::RolledBack };
        Ok(MutationOutcome {
            success: true,
            mutation_id: mutation_id.to_string(),
            state: Some(state),
            error: None,
        })
    }

    /// Mid-session progress check. Persists nothing.
    pub fn checkpoint(&self, session_id: &str, step: u32) -> anyhow::Result<CheckpointReport> {
        let analysis = self.analyzer.analyze_session(session_id)?;
        let suggestions = analysis
            .inefficiencies
            .iter()
            .filter(|i| i.severity >= CHECKPOINT_SUGGESTION_SEVERITY)
            .map(|i| i.suggestion)
            .collect();

        Ok(CheckpointReport {
            checkpoint_step: step,
            analysis_summary: AnalysisSummary {
                total_observations: analysis.performance_metrics.total_observations,
                success_rate: analysis.performance_metrics.success_rate,
                inefficiency_count: analysis.inefficiencies.len(),
            },
            suggestions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::analyzer::InefficiencyType;
    use crate::memory_db::NewObservation;

    fn setup() -> (Arc<MemoryDatabase>, MutationLifecycleManager, String) {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let session = db.sessions.create_session("/repo", "task", None).unwrap();
        let manager = MutationLifecycleManager::new(Arc::clone(&db), MutationConfig::default());
        (db, manager, session.session_id)
    }

    fn record(db: &MemoryDatabase, session_id: &str, tool: &str, input: &str, success: bool) {
        db.observations
            .append(NewObservation {
                session_id,
                tool_name: tool,
                input,
                output: "",
                context: "",
                execution_time_ms: 3,
                success,
            })
            .unwrap();
    }

    fn inefficiency(severity: f64) -> Inefficiency {
        Inefficiency {
            inefficiency_type: InefficiencyType::RepeatedErrors,
            details: "Same error pattern occurred 3 times".into(),
            severity,
            suggestion: MutationStrategy::ErrorPatternLookup,
        }
    }

    #[test]
    fn test_generate_caps_and_filters() {
        let (_db, manager, session_id) = setup();
        let strong: Vec<_> = (0..10).map(|_| inefficiency(0.9)).collect();
        let mutations = manager.generate(&strong, &session_id);
        assert_eq!(mutations.len(), 3);
        assert!(mutations.iter().all(|m| m.confidence_score >= 0.8 && !m.applied));

        let weak: Vec<_> = (0..10).map(|_| inefficiency(0.5)).collect();
        assert!(manager.generate(&weak, &session_id).is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (_db, manager, session_id) = setup();
        assert_eq!(manager.generate(&[inefficiency(4.0 / 5.0)], &session_id).len(), 1);
    }

    #[test]
    fn test_strategy_descriptor_is_json() {
        let (_db, manager, session_id) = setup();
        let mutation = &manager.generate(&[inefficiency(1.0)], &session_id)[0];
        let strategy: serde_json::Value = serde_json::from_str(&mutation.mutation_strategy).unwrap();
        assert_eq!(strategy["action"], "error_pattern_lookup");
        assert_eq!(strategy["details"], "Same error pattern occurred 3 times");
        assert_eq!(mutation.inefficiency_type, "repeated_errors");
    }

    #[test]
    fn test_custom_config() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let manager = MutationLifecycleManager::new(
            db,
            MutationConfig { confidence_threshold: 0.5, max_mutations_per_session: 1 },
        );
        assert_eq!(manager.generate(&[inefficiency(0.6), inefficiency(0.7)], "s").len(), 1);
    }

    #[test]
    fn test_apply_requires_confirmation_then_rollback() {
        let (db, manager, session_id) = setup();
        let mutation = manager.generate(&[inefficiency(0.9)], &session_id).remove(0);
        db.mutations.record(&mutation).unwrap();

        let err = manager.apply(&mutation.mutation_id, false).unwrap_err();
        assert!(matches!(err.downcast_ref::<MemoryError>(), Some(MemoryError::ConfirmationRequired(_))));
        assert!(!db.mutations.get(&mutation.mutation_id).unwrap().unwrap().applied);

        let applied = manager.apply(&mutation.mutation_id, true).unwrap();
        assert!(applied.success);
        assert_eq!(applied.state, Some(MutationState::Applied));
        assert!(db.mutations.get(&mutation.mutation_id).unwrap().unwrap().applied);

        let rolled = manager.rollback(&mutation.mutation_id).unwrap();
        assert_eq!(rolled.state, Some(MutationState::RolledBack));
        let stored = db.mutations.get(&mutation.mutation_id).unwrap().unwrap();
        assert!(!stored.applied);
        assert_eq!(stored.outcome.as_deref(), Some("rolled_back"));

        // re-apply after rollback
        assert!(manager.apply(&mutation.mutation_id, true).unwrap().success);
        assert!(manager.apply(&mutation.mutation_id, true).unwrap().success);
    }

    #[test]
    fn test_unknown_mutation_is_a_noop() {
        let (_db, manager, _session_id) = setup();
        let outcome = manager.apply("does-not-exist", true).unwrap();
        assert!(!outcome.success);
        assert!(outcome.state.is_none());
        assert!(!manager.rollback("does-not-exist").unwrap().success);
    }

    #[test]
    fn test_three_reads_end_to_end() {
        let (db, manager, session_id) = setup();
        for _ in 0..3 {
            record(&db, &session_id, "read_file", "/repo/a.py", true);
        }

        let report = manager.evolve(&session_id).unwrap();
        assert_eq!(report.analysis.inefficiencies.len(), 1);
        assert_eq!(report.analysis.inefficiencies[0].inefficiency_type, InefficiencyType::RedundantFileReads);
        assert!((report.analysis.inefficiencies[0].severity - 0.6).abs() < 1e-9);
        assert!(report.mutations.is_empty());
        assert!(db.mutations.for_session(&session_id).unwrap().is_empty());
    }

    #[test]
    fn test_two_failures_end_to_end() {
        let (db, manager, session_id) = setup();
        record(&db, &session_id, "run_command", "pytest -x", false);
        record(&db, &session_id, "run_command", "pytest -x", false);

        let report = manager.evolve(&session_id).unwrap();
        assert_eq!(report.analysis.inefficiencies.len(), 1);
        assert_eq!(report.analysis.inefficiencies[0].inefficiency_type, InefficiencyType::RepeatedErrors);
        assert!((report.analysis.inefficiencies[0].severity - 0.667).abs() < 1e-3);
        assert!(report.mutations.is_empty());
    }

    #[test]
    fn test_evolve_persists_strong_mutations() {
        let (db, manager, session_id) = setup();
        for _ in 0..5 {
            record(&db, &session_id, "view_file", "/repo/big.rs", true);
        }
        for _ in 0..3 {
            record(&db, &session_id, "bash", "make", false);
        }

        let report = manager.evolve(&session_id).unwrap();
        assert_eq!(report.mutations.len(), 2);
        assert_eq!(db.mutations.for_session(&session_id).unwrap().len(), 2);
    }

    #[test]
    fn test_checkpoint_reports_without_persisting() {
        let (db, manager, session_id) = setup();
        let empty = manager.checkpoint(&session_id, 1).unwrap();
        assert_eq!(empty.analysis_summary.total_observations, 0);
        assert_eq!(empty.analysis_summary.success_rate, 1.0);
        assert!(empty.suggestions.is_empty());

        for _ in 0..4 {
            record(&db, &session_id, "read_file", "/repo/a.py", true);
        }
        let report = manager.checkpoint(&session_id, 2).unwrap();
        assert_eq!(report.checkpoint_step, 2);
        assert_eq!(report.analysis_summary.inefficiency_count, 1);
        assert_eq!(report.suggestions, vec![MutationStrategy::CacheFileContent]);
        assert!(db.mutations.for_session(&session_id).unwrap().is_empty());
    }
}
