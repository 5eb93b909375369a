//! Detects wasteful patterns in a session's observation stream.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory_db::migration::round2;
use crate::memory_db::{MemoryDatabase, Observation};
use crate::utils::TextUtils;

/// Tools whose input is a file to look at.
pub const READ_TOOLS: &[&str] = &["view_file", "read_file", "Read"];
pub const REDUNDANT_READ_MIN_COUNT: usize = 3;
pub const REPEATED_ERROR_MIN_COUNT: usize = 2;
pub const ERROR_KEY_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InefficiencyType {
    RedundantFileReads,
    RepeatedErrors,
    CircularNavigation,
    ExcessiveSearches,
    RetryWithoutChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStrategy {
    CacheFileContent,
    ErrorPatternLookup,
    SmarterNavigation,
    TargetedSearch,
    VerifyBeforeRetry,
}

impl InefficiencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedundantFileReads => "redundant_file_reads",
            Self::RepeatedErrors => "repeated_errors",
            Self::CircularNavigation => "circular_navigation",
            Self::ExcessiveSearches => "excessive_searches",
            Self::RetryWithoutChange => "retry_without_change",
        }
    }

    pub fn suggested_strategy(&self) -> MutationStrategy {
        match self {
            Self::RedundantFileReads => MutationStrategy::CacheFileContent,
            Self::RepeatedErrors => MutationStrategy::ErrorPatternLookup,
            Self::CircularNavigation => MutationStrategy::SmarterNavigation,
            Self::ExcessiveSearches => MutationStrategy::TargetedSearch,
            Self::RetryWithoutChange => MutationStrategy::VerifyBeforeRetry,
        }
    }
}

impl MutationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFileContent => "cache_file_content",
            Self::ErrorPatternLookup => "error_pattern_lookup",
            Self::SmarterNavigation => "smarter_navigation",
            Self::TargetedSearch => "targeted_search",
            Self::VerifyBeforeRetry => "verify_before_retry",
        }
    }
}

impl fmt::Display for InefficiencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MutationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inefficiency {
    #[serde(rename = "type")]
    pub inefficiency_type: InefficiencyType,
    pub details: String,
    pub severity: f64,
    pub suggestion: MutationStrategy,
}

impl Inefficiency {
    fn new(inefficiency_type: InefficiencyType, details: String, severity: f64) -> Self {
        Self {
            inefficiency_type,
            details,
            severity,
            suggestion: inefficiency_type.suggested_strategy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_observations: usize,
    pub total_execution_time_ms: i64,
    pub success_rate: f64,
    pub error_count: usize,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_observations: 0,
            total_execution_time_ms: 0,
            success_rate: 1.0,
            error_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub count: usize,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeAnalysis {
    pub tool_frequency: BTreeMap<String, usize>,
    pub error_patterns: ErrorSummary,
    pub inefficiencies: Vec<Inefficiency>,
    pub performance_metrics: PerformanceMetrics,
}

pub struct InefficiencyAnalyzer {
    database: Arc<MemoryDatabase>,
}

impl InefficiencyAnalyzer {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self { database }
    }

    pub fn analyze_session(&self, session_id: &str) -> anyhow::Result<RuntimeAnalysis> {
        let observations = self.database.observations.session_observations(session_id)?;
        debug!("Analyzing {} observations for session {}", observations.len(), session_id);
        Ok(analyze_observations(&observations))
    }
}

/// Analyze one session's observations, given in recording order.
pub fn analyze_observations(observations: &[Observation]) -> RuntimeAnalysis {
    if observations.is_empty() {
        return RuntimeAnalysis::default();
    }

    let mut tool_frequency = BTreeMap::new();
    for obs in observations {
        *tool_frequency.entry(obs.tool_name.clone()).or_insert(0) += 1;
    }

    let failures: Vec<&Observation> = observations.iter().filter(|o| !o.success).collect();
    let mut failing_tools: Vec<String> = Vec::new();
    for obs in &failures {
        if !failing_tools.contains(&obs.tool_name) {
            failing_tools.push(obs.tool_name.clone());
        }
    }

    let mut inefficiencies = Vec::new();

    let reads = observations
        .iter()
        .filter(|o| READ_TOOLS.contains(&o.tool_name.as_str()))
        .map(|o| o.input_data.as_str());
    for (path, count) in count_in_order(reads) {
        if !path.is_empty() && count >= REDUNDANT_READ_MIN_COUNT {
            inefficiencies.push(Inefficiency::new(
                InefficiencyType::RedundantFileReads,
                format!("File '{}' read {} times", path, count),
                (count as f64 / 5.0).min(1.0),
            ));
        }
    }

    let error_keys = observations
        .iter()
        .filter(|o| !o.success)
        .map(|o| TextUtils::first_chars(&o.input_data, ERROR_KEY_CHARS));
    for (key, count) in count_in_order(error_keys) {
        if !key.is_empty() && count >= REPEATED_ERROR_MIN_COUNT {
            inefficiencies.push(Inefficiency::new(
                InefficiencyType::RepeatedErrors,
                format!("Same error pattern occurred {} times", count),
                (count as f64 / 3.0).min(1.0),
            ));
        }
    }

    let total = observations.len();
    let successes = total - failures.len();
    let performance_metrics = PerformanceMetrics {
        total_observations: total,
        total_execution_time_ms: observations.iter().map(|o| o.execution_time_ms).sum(),
        success_rate: round2(successes as f64 / total as f64),
        error_count: failures.len(),
    };

    RuntimeAnalysis {
        tool_frequency,
        error_patterns: ErrorSummary {
            count: failures.len(),
            tools: failing_tools,
        },
        inefficiencies,
        performance_metrics,
    }
}

/// Occurrence counts keyed by value, in order of first appearance.
fn count_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for value in values {
        match index.get(value) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value, counts.len());
                counts.push((value, 1));
            }
        }
    }
    counts
}
