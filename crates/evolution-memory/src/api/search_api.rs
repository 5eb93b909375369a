//! Similarity search over worker observations

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, WorkerState};
use crate::metrics;
use crate::similarity::query_or_empty;

pub const DEFAULT_N_RESULTS: usize = 5;
pub const MAX_N_RESULTS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub n_results: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub session_id: String,
    pub title: String,
    pub semantic_summary: String,
    pub score: f32,
}

/// `GET /search/?query=&n_results=`. An unavailable index yields no results
/// rather than an error.
pub async fn search_observations(
    State(state): State<WorkerState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    if params.query.trim().is_empty() {
        return Err(ApiError::bad_request("Query cannot be empty"));
    }
    let n_results = params.n_results.unwrap_or(DEFAULT_N_RESULTS).clamp(1, MAX_N_RESULTS);

    let matches = query_or_empty(state.index.as_ref(), &params.query, n_results).await;
    metrics::inc_searches();

    let mut results = Vec::with_capacity(matches.len());
    for m in matches {
        // the index may know ids the store has since lost; skip those
        if let Some(stored) = state.db.worker.get(m.id)? {
            results.push(SearchHit {
                id: stored.id,
                session_id: stored.session_id,
                title: stored.title,
                semantic_summary: stored.semantic_summary,
                score: m.score,
            });
        }
    }
    debug!("Search '{}' returned {} results", params.query, results.len());

    Ok(Json(SearchResponse {
        query: params.query,
        total: results.len(),
        results,
    }))
}
