//! Error taxonomy for the pipeline
//!
//! Only conditions that abort a request become an [`Error`]. Collaborator
//! failures that the pipeline recovers from are recorded as
//! [`crate::Degradation`] entries instead.

use thiserror::Error;

/// Fatal pipeline errors surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller supplied unusable input (no text and no audio, unreadable audio)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Primary retrieval failed or its breaker is open
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Caller cancelled the request before completion
    #[error("Request cancelled")]
    Cancelled,

    /// Admission control rejected the request
    #[error("Pipeline overloaded: {0}")]
    Overloaded(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::RetrievalUnavailable(_) => "RETRIEVAL_UNAVAILABLE",
            Error::Cancelled => "CANCELLED",
            Error::Overloaded(_) => "OVERLOADED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix the request and try again
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
