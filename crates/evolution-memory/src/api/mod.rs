// evolution-memory/src/api/mod.rs
//! HTTP worker endpoints: enriched observation ingest, similarity search,
//! context loading and store statistics.

pub mod context_api;
pub mod observation_api;
pub mod search_api;

pub use context_api::{load_context, memory_stats, ContextRequest};
pub use observation_api::{add_observation, get_observation, WorkerObservationRequest};
pub use search_api::{search_observations, SearchParams, SearchResponse};

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::error::MemoryError;
use crate::memory_db::MemoryDatabase;
use crate::similarity::SimilarityIndex;

/// State shared by every handler.
#[derive(Clone)]
pub struct WorkerState {
    pub db: Arc<MemoryDatabase>,
    pub index: Arc<dyn SimilarityIndex>,
    pub retrieval_limit: usize,
}

impl WorkerState {
    pub fn new(db: Arc<MemoryDatabase>, index: Arc<dyn SimilarityIndex>, retrieval_limit: usize) -> Self {
        Self { db, index, retrieval_limit }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "code": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<MemoryError>() {
            Some(MemoryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Some(MemoryError::MalformedInput(_)) => StatusCode::BAD_REQUEST,
            Some(MemoryError::ConfirmationRequired(_)) => StatusCode::CONFLICT,
            Some(MemoryError::Storage(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {:#}", err);
        }
        Self { status, message: err.to_string() }
    }
}

/// Session ids are opaque but must stay printable and bounded.
pub(crate) fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.is_empty() {
        return Err(ApiError::bad_request("Session ID cannot be empty"));
    }
    if session_id.len() > 256 {
        return Err(ApiError::bad_request("Session ID too long (max 256 chars)"));
    }
    if !session_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::bad_request("Session ID contains invalid characters"));
    }
    Ok(())
}
