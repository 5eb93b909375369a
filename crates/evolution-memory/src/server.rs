//! HTTP worker startup
//!
//! Handlers share one `MemoryDatabase` handle and one similarity index
//! through `WorkerState`. The store is synchronous and bounded by its
//! connection pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::{
    api::WorkerState,
    config::Config,
    memory_db::MemoryDatabase,
    similarity::KeywordSimilarityIndex,
};

/// Run the worker until the listener fails or the task is cancelled.
pub async fn run_worker_server(cfg: Config, db: Arc<MemoryDatabase>) -> anyhow::Result<()> {
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let index = Arc::new(KeywordSimilarityIndex::new());
    if let Err(e) = index.rebuild(&db).await {
        warn!("Similarity index rebuild failed: {}. Starting with an empty index.", e);
    }

    let state = WorkerState::new(db, index, cfg.retrieval_limit);
    let addr = cfg.worker_addr()?;

    info!("Starting memory worker on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state, Duration::from_secs(cfg.worker_timeout_seconds));

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: WorkerState, request_timeout: Duration) -> axum::Router {
    use axum::{
        middleware,
        routing::{get, post},
        Router,
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
        timeout::TimeoutLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/observations/", post(crate::api::observation_api::add_observation))
        .route("/observations/:id", get(crate::api::observation_api::get_observation))
        .route("/search/", get(crate::api::search_api::search_observations))
        .route("/context", post(crate::api::context_api::load_context))
        .route("/stats", get(crate::api::context_api::memory_stats))
        .route("/metrics", get(crate::metrics::get_metrics))
        .route("/healthz", get(|| async { "OK" }))
        .layer(middleware::from_fn(count_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn count_requests(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let route = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    crate::metrics::inc_request(&route, response.status().as_str());
    response
}
