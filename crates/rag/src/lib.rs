//! Retrieval and context assembly for property Q&A
//!
//! Features:
//! - Vector search collaborator (HTTP client and in-memory hash embedding index)
//! - Property store collaborator (HTTP client and fixture-backed store)
//! - Retrieval coordination: primary search plus similarity expansion under one deadline
//! - Token-budgeted prompt context assembly
//! - Property indexing (store row to embedding)

pub mod context;
pub mod embeddings;
pub mod indexer;
pub mod property_store;
pub mod retriever;
pub mod vector_search;

pub use context::{ContextAssembler, ContextAssemblerConfig};
pub use embeddings::{EmbeddingConfig, SimpleEmbedder};
pub use indexer::PropertyIndexer;
pub use property_store::{
    fetch_details, DetailsLookup, HttpPropertyStore, InMemoryPropertyStore, PropertyStore,
};
pub use retriever::{RetrievalCoordinator, RetrievalOutcome, RetrieverConfig};
pub use vector_search::{EmbedAck, HttpVectorSearch, InMemoryVectorSearch, VectorSearch};

use property_qa_core::RetryableError;
use thiserror::Error;

/// RAG errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Collaborator returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Fixture error: {0}")]
    Fixture(String),
}

impl RetryableError for RagError {
    fn is_retryable(&self) -> bool {
        match self {
            RagError::Connection(_) => true,
            RagError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            RagError::NotFound(_) | RagError::Fixture(_) => false,
            RagError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RagError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            RagError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RagError::Connection(err.to_string())
        }
    }
}

impl From<RagError> for property_qa_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::NotFound(msg) => property_qa_core::Error::InvalidInput(msg),
            other => property_qa_core::Error::RetrievalUnavailable(other.to_string()),
        }
    }
}

/// Map a non-success HTTP status into a [`RagError`]
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> RagError {
    if status == reqwest::StatusCode::NOT_FOUND {
        RagError::NotFound(body)
    } else {
        RagError::Status {
            status: status.as_u16(),
            message: body,
        }
    }
}
