use prometheus::{Encoder, TextEncoder, Registry, IntCounter, IntCounterVec};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static OBSERVATIONS_INGESTED: OnceLock<IntCounter> = OnceLock::new();
static SEARCHES_SERVED: OnceLock<IntCounter> = OnceLock::new();
static MUTATIONS_GENERATED: OnceLock<IntCounter> = OnceLock::new();

/// Register the worker's counters. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    if REQ_COUNTER.get().is_some() {
        return Ok(());
    }

    let req_counter = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    )?;
    let observations = IntCounter::new("observations_ingested_total", "Observations persisted")?;
    let searches = IntCounter::new("searches_total", "Search requests served")?;
    let mutations = IntCounter::new("mutations_generated_total", "Mutations proposed by evolve runs")?;

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(observations.clone())).ok();
    REGISTRY.register(Box::new(searches.clone())).ok();
    REGISTRY.register(Box::new(mutations.clone())).ok();

    let _ = REQ_COUNTER.set(req_counter);
    let _ = OBSERVATIONS_INGESTED.set(observations);
    let _ = SEARCHES_SERVED.set(searches);
    let _ = MUTATIONS_GENERATED.set(mutations);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_observations() {
    if let Some(counter) = OBSERVATIONS_INGESTED.get() {
        counter.inc();
    }
}

pub fn inc_searches() {
    if let Some(counter) = SEARCHES_SERVED.get() {
        counter.inc();
    }
}

pub fn add_mutations(count: usize) {
    if let Some(counter) = MUTATIONS_GENERATED.get() {
        counter.inc_by(count as u64);
    }
}

/// Prometheus text exposition of the registry.
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

pub async fn get_metrics() -> impl IntoResponse {
    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; version=0.0.4")],
                Vec::new(),
            )
        }
    }
}
