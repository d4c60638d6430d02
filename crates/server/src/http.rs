//! HTTP Endpoints
//!
//! REST API for submitting property questions.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Json, Path, Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use property_qa_core::{AssembledResponse, AudioRef, Error, PropertyId, RawRequest};
use property_qa_pipeline::HealthStatus;
use property_qa_rag::RagError;

use crate::metrics::{metrics_handler, record_failure, record_response};
use crate::state::AppState;

/// Slack on top of the pipeline deadline before the HTTP layer gives up
const RESPONSE_GRACE: Duration = Duration::from_secs(1);

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let pipeline = &state.config.pipeline;
    let request_timeout =
        pipeline.overall_deadline(true) + pipeline.admission_timeout() + RESPONSE_GRACE;
    let body_limit = server.max_body_bytes;

    Router::new()
        .route("/api/query", post(submit_query))
        .route("/api/voice-query", post(submit_voice_query))
        .route("/admin/index/:property_id", post(index_property))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// Disabled CORS allows everything. Unparseable origins are skipped.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    let parsed = if parsed.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        parsed
    };

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Retrieval options shared by both query endpoints
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub include_similar: Option<bool>,
    #[serde(default)]
    pub require_similar: Option<bool>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl QueryParams {
    fn apply(self, mut raw: RawRequest) -> RawRequest {
        raw.language = self.language;
        if let Some(include) = self.include_similar {
            raw.include_similar = include;
        }
        if let Some(require) = self.require_similar {
            raw.require_similar = require;
        }
        raw.max_results = self.max_results;
        raw
    }
}

/// JSON body of `POST /api/query`
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Base64-encoded audio bytes
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(flatten)]
    pub params: QueryParams,
}

impl QueryRequest {
    fn into_raw(self) -> Result<RawRequest, Error> {
        // Server-local files stay reachable only to in-process callers
        let audio = match self.audio_base64 {
            Some(encoded) => Some(AudioRef::Inline(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| Error::InvalidInput(format!("audio_base64: {}", e)))?,
            )),
            None => None,
        };
        let raw = RawRequest {
            text: self.query,
            audio,
            ..RawRequest::default()
        };
        Ok(self.params.apply(raw))
    }
}

/// Fatal pipeline error rendered as the standard error body
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() },
            "matches": [],
        });
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        // client closed request
        Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Error::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn run_query(state: &AppState, raw: RawRequest) -> Result<Json<AssembledResponse>, ApiError> {
    match state.orchestrator.submit_query(raw).await {
        Ok(response) => {
            record_response(&response);
            Ok(Json(response))
        }
        Err(err) => {
            record_failure(&err);
            Err(ApiError(err))
        }
    }
}

/// POST /api/query
async fn submit_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AssembledResponse>, ApiError> {
    let Json(request) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let raw = request.into_raw()?;
    run_query(&state, raw).await
}

/// POST /api/voice-query
///
/// Raw audio body, options in the query string.
async fn submit_voice_query(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<AssembledResponse>, ApiError> {
    let Query(params) = params.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let raw = params.apply(RawRequest::audio(AudioRef::Inline(body.to_vec())));
    run_query(&state, raw).await
}

/// POST /admin/index/:property_id
async fn index_property(
    State(state): State<AppState>,
    Path(property_id): Path<PropertyId>,
) -> Response {
    match state.orchestrator.index_property(property_id).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(err) => {
            let (status, code) = match &err {
                RagError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                _ => (StatusCode::BAD_GATEWAY, "INDEXING_FAILED"),
            };
            tracing::warn!(property_id, error = %err, "Indexing request failed");
            let body = json!({ "error": { "code": code, "message": err.to_string() } });
            (status, Json(body)).into_response()
        }
    }
}

/// GET /health
///
/// Always 200; the body reports breaker states.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.health();
    if report.status == HealthStatus::Degraded {
        tracing::debug!(breakers = ?report.breakers, "Health degraded");
    }
    Json(report)
}

/// GET /ready
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.ready() {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "vector search circuit open" })),
        )
    }
}
