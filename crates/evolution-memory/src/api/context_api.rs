//! Context loading and store statistics over HTTP

use axum::{extract::State, Json};
use serde::Deserialize;

use super::{ApiError, WorkerState};
use crate::context_engine::{ContextBundle, RetrievalEngine};
use crate::memory_db::MemoryStatistics;

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub project_path: String,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `POST /context`
pub async fn load_context(
    State(state): State<WorkerState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextBundle>, ApiError> {
    if request.project_path.trim().is_empty() {
        return Err(ApiError::bad_request("project_path cannot be empty"));
    }
    let engine = RetrievalEngine::with_limit(state.db.clone(), state.retrieval_limit);
    let bundle = engine.load_context(
        &request.project_path,
        request.task_description.as_deref(),
        request.limit,
    )?;
    Ok(Json(bundle))
}

/// `GET /stats`
pub async fn memory_stats(State(state): State<WorkerState>) -> Result<Json<MemoryStatistics>, ApiError> {
    Ok(Json(state.db.statistics()?))
}
