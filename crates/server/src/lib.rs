//! Property Q&A Server
//!
//! Thin HTTP surface over the pipeline orchestrator: query submission,
//! health and readiness, Prometheus metrics.

pub mod http;
pub mod metrics;
pub mod state;
pub mod wiring;

pub use http::create_router;
pub use metrics::{init_metrics, record_failure, record_response};
pub use state::AppState;
pub use wiring::build_collaborators;

use thiserror::Error;

/// Server startup errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collaborator setup failed: {0}")]
    Collaborator(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}
