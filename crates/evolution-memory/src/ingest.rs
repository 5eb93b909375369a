//! Tool-call events delivered by capture hooks.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::enrichment::{summarize_or_default, Summarizer};
use crate::error::MemoryError;
use crate::memory_db::{MemoryDatabase, NewObservation, Observation, ToolPayload};
use crate::utils::TextUtils;

/// Characters of payload handed to the summarizer per field.
const SUMMARY_INPUT_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservationEvent {
    #[serde(default)]
    pub session_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Value,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
}

fn default_success() -> bool {
    true
}

impl ObservationEvent {
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let event: Self = serde_json::from_str(json)
            .map_err(|e| MemoryError::malformed(format!("Invalid observation event: {}", e)))?;
        if event.tool_name.trim().is_empty() {
            return Err(MemoryError::malformed("Observation event has an empty tool_name").into());
        }
        Ok(event)
    }
}

/// Persist one event. The event's own session id wins over `fallback_session`
/// (usually the `.current_session` pointer). An empty context note is filled
/// from the summarizer when it produces anything.
pub async fn ingest_event(
    db: &MemoryDatabase,
    summarizer: &dyn Summarizer,
    event: ObservationEvent,
    fallback_session: Option<&str>,
) -> anyhow::Result<Observation> {
    let session_id = match event.session_id.as_deref().or(fallback_session) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => {
            return Err(MemoryError::malformed("Observation event has no session id and no session is active").into())
        }
    };

    let input = ToolPayload::from_value(event.tool_input).to_stored_string();
    let output = ToolPayload::from_value(event.tool_output).to_stored_string();

    let context = if event.context.trim().is_empty() {
        let prompt = format!(
            "Tool: {}\nInput: {}\nOutput: {}",
            event.tool_name,
            TextUtils::first_chars(&input, SUMMARY_INPUT_CHARS),
            TextUtils::first_chars(&output, SUMMARY_INPUT_CHARS),
        );
        let enrichment = summarize_or_default(summarizer, &prompt).await;
        if enrichment.summary.is_empty() { enrichment.title } else { enrichment.summary }
    } else {
        event.context
    };

    let observation = db.observations.append(NewObservation {
        session_id: &session_id,
        tool_name: &event.tool_name,
        input: &input,
        output: &output,
        context: &context,
        execution_time_ms: event.execution_time_ms.unwrap_or(0),
        success: event.success,
    })?;

    debug!("Ingested {} observation for session {}", observation.tool_name, session_id);
    Ok(observation)
}
