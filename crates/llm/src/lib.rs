//! Generation for property Q&A
//!
//! Features:
//! - Pluggable generation backend trait with an HTTP implementation
//! - Resilient adapter: per-call timeout, at most one retry, circuit breaker
//! - Templated fallback narrative built only from prompt context

pub mod adapter;
pub mod backend;
pub mod fallback;

pub use adapter::{GenerationAdapter, GenerationConfig};
pub use backend::{GenerationBackend, GenerationOutput, HttpGenerationBackend};
pub use fallback::fallback_narrative;

use property_qa_core::RetryableError;
use thiserror::Error;

/// LLM errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    /// Prompt or output rejected by the provider's content policy
    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RetryableError for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_))
    }

    fn trips_breaker(&self) -> bool {
        !matches!(self, LlmError::ContentPolicy(_) | LlmError::Configuration(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
