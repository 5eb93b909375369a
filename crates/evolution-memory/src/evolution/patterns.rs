//! Cross-session aggregation: workflows, error patterns, per-tool success
//! rates, and the skill / agent-rule proposals derived from learnings.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory_db::migration::round2;
use crate::memory_db::{ErrorPatternRow, Learning, MemoryDatabase, ToolSuccessRow};
use crate::utils::TextUtils;

const TOP_WORKFLOWS: usize = 10;
const TOP_TOOLS: usize = 20;
const TOP_ERROR_PATTERNS: usize = 10;
const MIN_USES_FOR_METRICS: i64 = 5;
const WORKFLOW_PREFIX_LEN: usize = 20;
const WORKFLOW_LENGTHS: [usize; 3] = [3, 4, 5];
const MIN_WORKFLOW_FREQUENCY: usize = 3;
const SKILL_MIN_FREQUENCY: i64 = 3;
const SKILL_MIN_CONFIDENCE: f64 = 0.7;
const RULE_MIN_CONFIDENCE: f64 = 0.8;
const RULE_MIN_FREQUENCY: i64 = 5;
const MAX_RULES: usize = 5;
const WARNING_MIN_FAILURES: i64 = 10;
const MAX_WARNINGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCount {
    pub workflow: String,
    pub frequency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub uses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    pub common_workflows: Vec<WorkflowCount>,
    pub tool_preferences: Vec<ToolUsage>,
    pub error_patterns: Vec<ErrorPatternRow>,
    pub success_metrics: Vec<ToolSuccessRow>,
    pub projects_analyzed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    pub sequence: Vec<String>,
    pub frequency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEvidence {
    pub frequency: i64,
    pub confidence: f64,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillProposal {
    pub skill_name: String,
    pub description: String,
    pub based_on: SkillEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSuggestion {
    pub suggestion: Option<SkillProposal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRuleProposal {
    AddRule {
        pattern: String,
        description: String,
        frequency: i64,
        confidence: f64,
        suggestion: String,
    },
    AddWarning {
        tool: String,
        error_count: i64,
        suggestion: String,
    },
}

pub struct PatternAggregator {
    database: Arc<MemoryDatabase>,
}

impl PatternAggregator {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self { database }
    }

    /// Aggregate every session, or only those whose project path starts with `path_prefix`.
    pub fn aggregate(&self, path_prefix: Option<&str>) -> anyhow::Result<PatternReport> {
        let path_prefix = path_prefix.filter(|p| !p.is_empty());
        let session_ids = self.database.sessions.session_ids(path_prefix)?;

        let mut workflows = Vec::new();
        let mut tools = Vec::new();
        for session_id in &session_ids {
            let sequence = self.database.observations.tool_sequence(session_id, None)?;
            for window in sequence.windows(3) {
                workflows.push(window.join(" -> "));
            }
            tools.extend(sequence);
        }
        debug!("Aggregated {} sessions, {} tool calls", session_ids.len(), tools.len());

        let mut success_metrics = self
            .database
            .observations
            .tool_success_metrics(path_prefix, MIN_USES_FOR_METRICS)?;
        for metric in &mut success_metrics {
            metric.success_rate = round2(metric.success_rate);
        }

        Ok(PatternReport {
            common_workflows: rank_by_count(workflows)
                .into_iter()
                .take(TOP_WORKFLOWS)
                .map(|(workflow, frequency)| WorkflowCount { workflow, frequency })
                .collect(),
            tool_preferences: rank_by_count(tools)
                .into_iter()
                .take(TOP_TOOLS)
                .map(|(tool_name, uses)| ToolUsage { tool_name, uses })
                .collect(),
            error_patterns: self.database.observations.repeated_errors(path_prefix, TOP_ERROR_PATTERNS)?,
            success_metrics,
            projects_analyzed: self.database.sessions.count_projects(path_prefix)?,
        })
    }

    /// Tool subsequences of length 3 to 5 recurring across the opening moves of sessions.
    pub fn common_workflows(&self) -> anyhow::Result<Vec<WorkflowPattern>> {
        let mut subsequences: Vec<Vec<String>> = Vec::new();
        for session_id in self.database.sessions.session_ids(None)? {
            let sequence = self
                .database
                .observations
                .tool_sequence(&session_id, Some(WORKFLOW_PREFIX_LEN))?;
            for length in WORKFLOW_LENGTHS {
                subsequences.extend(sequence.windows(length).map(|w| w.to_vec()));
            }
        }

        Ok(rank_by_count(subsequences)
            .into_iter()
            .take(TOP_WORKFLOWS)
            .filter(|(_, count)| *count >= MIN_WORKFLOW_FREQUENCY)
            .map(|(sequence, frequency)| WorkflowPattern { sequence, frequency })
            .collect())
    }

    pub fn suggest_skill(&self, pattern_type: &str) -> anyhow::Result<SkillSuggestion> {
        let Some(learning) = self.database.learnings.get_by_pattern(pattern_type)? else {
            return Ok(SkillSuggestion {
                suggestion: None,
                reason: Some("Pattern not found".to_string()),
                template: None,
            });
        };

        if learning.frequency < SKILL_MIN_FREQUENCY || learning.confidence_score < SKILL_MIN_CONFIDENCE {
            return Ok(SkillSuggestion {
                suggestion: None,
                reason: Some(format!(
                    "Pattern not frequent or confident enough (frequency {}, confidence {:.2})",
                    learning.frequency, learning.confidence_score
                )),
                template: None,
            });
        }

        let skill_name = skill_name(pattern_type);
        let template = skill_template(&skill_name, pattern_type, &learning);
        Ok(SkillSuggestion {
            suggestion: Some(SkillProposal {
                skill_name,
                description: learning.description.clone(),
                based_on: SkillEvidence {
                    frequency: learning.frequency,
                    confidence: learning.confidence_score,
                    sources: learning.source_sessions.clone(),
                },
            }),
            reason: None,
            template: Some(template),
        })
    }

    /// Rules for well-established learnings, warnings for tools that fail often.
    pub fn propose_agent_rules(&self) -> anyhow::Result<Vec<AgentRuleProposal>> {
        let mut proposals: Vec<AgentRuleProposal> = self
            .database
            .learnings
            .established(RULE_MIN_CONFIDENCE, RULE_MIN_FREQUENCY, MAX_RULES)?
            .into_iter()
            .map(|learning| AgentRuleProposal::AddRule {
                suggestion: format!(
                    "Add rule for '{}': {}",
                    learning.pattern_type,
                    TextUtils::first_chars(&learning.description, 100)
                ),
                pattern: learning.pattern_type,
                description: learning.description,
                frequency: learning.frequency,
                confidence: learning.confidence_score,
            })
            .collect();

        for (tool, error_count) in self.database.observations.failing_tools(WARNING_MIN_FAILURES, MAX_WARNINGS)? {
            proposals.push(AgentRuleProposal::AddWarning {
                suggestion: format!("Add caution for '{}' - {} recorded failures", tool, error_count),
                tool,
                error_count,
            });
        }

        Ok(proposals)
    }
}

pub fn skill_name(pattern_type: &str) -> String {
    pattern_type.to_lowercase().replace(' ', "-")
}

fn skill_template(skill_name: &str, pattern_type: &str, learning: &Learning) -> String {
    format!(
        "---\nname: {name}\ndescription: {description}\n---\n\n# {pattern}\n\n\
         This skill was auto-suggested based on {frequency} occurrences \
         with {confidence:.0}% confidence.\n\n\
         ## When to Use\n\n[Describe activation triggers]\n\n\
         ## Workflow\n\n[Document the workflow steps]\n\n\
         ## Examples\n\n[Provide usage examples]\n",
        name = skill_name,
        description = learning.description,
        pattern = pattern_type,
        frequency = learning.frequency,
        confidence = learning.confidence_score * 100.0,
    )
}

/// Distinct items with their counts, most frequent first; ties keep first-seen order.
fn rank_by_count<K: Eq + Hash + Clone>(items: Vec<K>) -> Vec<(K, usize)> {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, usize)> = Vec::new();
    for item in items {
        match index.get(&item) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(item.clone(), counts.len());
                counts.push((item, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::NewObservation;

    fn setup() -> (Arc<MemoryDatabase>, PatternAggregator) {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        (Arc::clone(&db), PatternAggregator::new(db))
    }

    fn run_tools(db: &MemoryDatabase, project: &str, tools: &[&str], success: bool) -> String {
        let session = db.sessions.create_session(project, "t", None).unwrap();
        for tool in tools {
            db.observations
                .append(NewObservation {
                    session_id: &session.session_id,
                    tool_name: tool,
                    input: "same input",
                    output: "",
                    context: "",
                    execution_time_ms: 1,
                    success,
                })
                .unwrap();
        }
        session.session_id
    }

    #[test]
    fn test_rank_by_count_is_stable() {
        let ranked = rank_by_count(vec!["b", "a", "a", "c", "b", "a"]);
        assert_eq!(ranked, vec![("a", 3), ("b", 2), ("c", 1)]);
        let ties = rank_by_count(vec!["x", "y"]);
        assert_eq!(ties, vec![("x", 1), ("y", 1)]);
    }

    #[test]
    fn test_aggregate_counts_workflows_and_tools() {
        let (db, aggregator) = setup();
        run_tools(&db, "/work/a", &["grep", "read_file", "edit_file", "run_tests"], true);
        run_tools(&db, "/work/b", &["grep", "read_file", "edit_file"], true);
        run_tools(&db, "/home/c", &["bash", "bash"], false);

        let report = aggregator.aggregate(Some("/work")).unwrap();
        assert_eq!(report.projects_analyzed, 2);
        assert_eq!(report.common_workflows[0].workflow, "grep -> read_file -> edit_file");
        assert_eq!(report.common_workflows[0].frequency, 2);
        assert_eq!(report.tool_preferences[0], ToolUsage { tool_name: "grep".into(), uses: 2 });
        assert!(report.error_patterns.is_empty());

        let everything = aggregator.aggregate(None).unwrap();
        assert_eq!(everything.projects_analyzed, 3);
        assert_eq!(everything.error_patterns.len(), 1);
        assert_eq!(everything.error_patterns[0].count, 2);
    }

    #[test]
    fn test_success_metrics_need_enough_uses() {
        let (db, aggregator) = setup();
        run_tools(&db, "/p", &["grep"; 6], true);
        run_tools(&db, "/p", &["grep"; 3], false);
        run_tools(&db, "/p", &["ls"; 2], true);

        let report = aggregator.aggregate(None).unwrap();
        assert_eq!(report.success_metrics.len(), 1);
        assert_eq!(report.success_metrics[0].tool_name, "grep");
        assert_eq!(report.success_metrics[0].success_rate, 0.67);
    }

    #[test]
    fn test_common_workflows_need_three_occurrences() {
        let (db, aggregator) = setup();
        for _ in 0..3 {
            run_tools(&db, "/p", &["search", "open", "edit"], true);
        }
        run_tools(&db, "/p", &["x", "y", "z"], true);

        let workflows = aggregator.common_workflows().unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].sequence, vec!["search", "open", "edit"]);
        assert_eq!(workflows[0].frequency, 3);
    }

    #[test]
    fn test_suggest_skill_thresholds() {
        let (db, aggregator) = setup();
        let missing = aggregator.suggest_skill("Nothing Here").unwrap();
        assert!(missing.suggestion.is_none());
        assert_eq!(missing.reason.as_deref(), Some("Pattern not found"));

        db.learnings.upsert("Cache Reads", "Cache file reads", 0.9, &["s1".into()]).unwrap();
        assert!(aggregator.suggest_skill("Cache Reads").unwrap().suggestion.is_none());

        db.learnings.upsert("Cache Reads", "Cache file reads", 0.9, &[]).unwrap();
        db.learnings.upsert("Cache Reads", "Cache file reads", 0.9, &[]).unwrap();
        let suggestion = aggregator.suggest_skill("Cache Reads").unwrap();
        let proposal = suggestion.suggestion.unwrap();
        assert_eq!(proposal.skill_name, "cache-reads");
        assert_eq!(proposal.based_on.frequency, 3);
        assert_eq!(proposal.based_on.sources, vec!["s1".to_string()]);
        let template = suggestion.template.unwrap();
        assert!(template.starts_with("---\nname: cache-reads\n"));
        assert!(template.contains("3 occurrences with 90% confidence"));
    }

    #[test]
    fn test_agent_rule_proposals() {
        let (db, aggregator) = setup();
        let learning = db.learnings.upsert("verify_paths", "Check the path exists first", 0.85, &[]).unwrap();
        db.learnings.increment_frequency(&learning.learning_id, 4).unwrap();
        db.learnings.upsert("rare", "Only seen once", 0.95, &[]).unwrap();
        run_tools(&db, "/p", &["bash"; 10], false);

        let proposals = aggregator.propose_agent_rules().unwrap();
        assert_eq!(proposals.len(), 2);
        assert!(matches!(&proposals[0], AgentRuleProposal::AddRule { pattern, .. } if pattern == "verify_paths"));
        assert!(matches!(&proposals[1], AgentRuleProposal::AddWarning { tool, error_count: 10, .. } if tool == "bash"));

        let json = serde_json::to_value(&proposals[1]).unwrap();
        assert_eq!(json["type"], "add_warning");
    }
}
