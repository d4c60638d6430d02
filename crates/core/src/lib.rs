//! Core types for the property Q&A pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Query and request types (text or audio input)
//! - Transcription, retrieval and generation value types
//! - The assembled response envelope with per-stage timings
//! - Error taxonomy with stable error codes
//! - Circuit breaker and retry primitives shared by every collaborator adapter

pub mod error;
pub mod llm_types;
pub mod property;
pub mod query;
pub mod resilience;
pub mod response;
pub mod tokens;
pub mod transcript;

pub use error::{Error, Result};
pub use llm_types::{ContextSnippet, LlmPrompt, LlmResponse};
pub use property::{
    rank_matches, EmbeddingVector, PropertyDetails, PropertyId, PropertyMatch, ScoredProperty,
};
pub use query::{AudioClip, AudioRef, InputKind, Query, QueryOptions, RawRequest};
pub use resilience::{
    BreakerConfig, BreakerPermit, BreakerSnapshot, CallError, CircuitBreaker, CircuitState,
    ResilientCall, RetryPolicy, RetryableError,
};
pub use response::{AssembledResponse, Degradation, Stage};
pub use tokens::{estimate_tokens, truncate_to_tokens};
pub use transcript::{EngineSource, TranscriptionResult};
