//! Prometheus metrics
//!
//! Everything is derived from the assembled response, so the pipeline itself
//! stays free of a metrics dependency.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use property_qa_core::{AssembledResponse, Error};

use crate::state::AppState;
use crate::ServerError;

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

/// Request count, stage latencies and degradations of a completed query
pub fn record_response(response: &AssembledResponse) {
    let kind = response.query.raw_kind.to_string();
    let outcome = if response.is_degraded() { "degraded" } else { "ok" };
    metrics::counter!("property_qa_requests_total", "kind" => kind, "outcome" => outcome)
        .increment(1);

    for (stage, ms) in &response.timing_breakdown {
        metrics::histogram!("property_qa_stage_latency_ms", "stage" => stage.as_str())
            .record(*ms as f64);
    }
    metrics::histogram!("property_qa_request_latency_ms").record(response.total_ms() as f64);

    for stage in &response.degraded {
        metrics::counter!("property_qa_degradations_total", "stage" => stage.as_str())
            .increment(1);
    }
}

/// Fatal request failure by error code
pub fn record_failure(error: &Error) {
    metrics::counter!("property_qa_failures_total", "code" => error.code()).increment(1);
}
