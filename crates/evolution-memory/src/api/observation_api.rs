//! Enriched observation ingest for the HTTP worker

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{validate_session_id, ApiError, WorkerState};
use crate::metrics;
use crate::similarity::add_or_warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerObservationRequest {
    pub session_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub semantic_summary: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Value,
}

/// `POST /observations/`: persist, then index. Indexing failures are logged
/// and do not fail the request.
pub async fn add_observation(
    State(state): State<WorkerState>,
    Json(payload): Json<WorkerObservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&payload.session_id)?;
    if payload.tool_name.trim().is_empty() {
        return Err(ApiError::bad_request("tool_name cannot be empty"));
    }

    let observation_json = serde_json::to_string(&payload)
        .map_err(|e| ApiError::bad_request(format!("Unserializable observation: {}", e)))?;

    let stored = state.db.worker.insert(
        &payload.session_id,
        &payload.title,
        &payload.semantic_summary,
        &observation_json,
    )?;

    add_or_warn(state.index.as_ref(), stored.id, &crate::similarity::indexed_text(&stored)).await;
    metrics::inc_observations();
    info!("Stored worker observation {} for session {}", stored.id, stored.session_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "id": stored.id,
        })),
    ))
}

/// `GET /observations/:id`: the observation JSON as it was posted.
pub async fn get_observation(
    State(state): State<WorkerState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    debug!("Fetching worker observation {}", id);
    let stored = state
        .db
        .worker
        .get(id)?
        .ok_or_else(|| ApiError::not_found("Observation not found"))?;

    let body: Value = serde_json::from_str(&stored.observation_json)
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Stored observation {} is not valid JSON: {}", id, e),
        })?;
    Ok(Json(body))
}
