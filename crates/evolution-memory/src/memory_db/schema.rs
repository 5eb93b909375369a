//! Database schema definitions for the memory system
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default per-field byte budget for observation payloads.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10_000;

/// One bounded unit of agent work on a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_description: String,
    pub summary: Option<String>,
    pub success_score: f64,
    pub token_usage: i64,
    pub conversation_id: Option<String>,
}

/// A single recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub input_data: String,
    pub output_data: String,
    pub context: String,
    pub execution_time_ms: i64,
    pub success: bool,
}

/// Parameters for appending an observation.
pub struct NewObservation<'a> {
    pub session_id: &'a str,
    pub tool_name: &'a str,
    pub input: &'a str,
    pub output: &'a str,
    pub context: &'a str,
    pub execution_time_ms: u64,
    pub success: bool,
}

/// A proposed change to agent behavior derived from a detected inefficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub mutation_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub inefficiency_type: String,
    pub mutation_strategy: String,
    pub confidence_score: f64,
    pub applied: bool,
    pub outcome: Option<String>,
    pub rollback_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Proposed,
    Applied,
    RolledBack,
}

pub const OUTCOME_APPLIED: &str = "applied";
pub const OUTCOME_ROLLED_BACK: &str = "rolled_back";

impl Mutation {
    pub fn state(&self) -> MutationState {
        if self.applied {
            MutationState::Applied
        } else if self.outcome.as_deref() == Some(OUTCOME_ROLLED_BACK) {
            MutationState::RolledBack
        } else {
            MutationState::Proposed
        }
    }
}

/// A recurring cross-session pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub learning_id: String,
    pub pattern_type: String,
    pub description: String,
    pub frequency: i64,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_sessions: Vec<String>,
    pub cross_project_refs: Vec<String>,
}

/// Structured facts pulled out of conversation text ahead of compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalFacts {
    #[serde(default)]
    pub task_state: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub code_refs: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// A prioritized capture of critical facts for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub snapshot_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub critical_facts: CriticalFacts,
    pub retrieval_priority: u8,
}

/// An enriched observation posted to the HTTP worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerObservation {
    pub id: i64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub semantic_summary: String,
    pub observation_json: String,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub total_sessions: i64,
    pub total_observations: i64,
    pub total_mutations: i64,
    pub total_learnings: i64,
    pub unique_projects: i64,
    pub avg_success_score: f64,
}

/// Opaque tool input/output. Tool-specific schemas are never interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Object(serde_json::Map<String, Value>),
    Array(Vec<Value>),
    Primitive(Value),
    Text(String),
}

impl ToolPayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => ToolPayload::Object(map),
            Value::Array(items) => ToolPayload::Array(items),
            Value::String(text) => ToolPayload::Text(text),
            other => ToolPayload::Primitive(other),
        }
    }

    /// Serialized form written to the store. Raw text is kept verbatim so a
    /// file path read twice groups under the same key.
    pub fn to_stored_string(&self) -> String {
        match self {
            ToolPayload::Object(map) => Value::Object(map.clone()).to_string(),
            ToolPayload::Array(items) => Value::Array(items.clone()).to_string(),
            ToolPayload::Primitive(Value::Null) => String::new(),
            ToolPayload::Primitive(value) => value.to_string(),
            ToolPayload::Text(text) => text.clone(),
        }
    }
}

/// Timestamps are written with fixed microsecond precision so string order
/// matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let formatted = format_timestamp(&now);
    (now, formatted)
}

pub fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}
