//! Request pipeline for property Q&A
//!
//! Drives one request through:
//! normalization → transcription (audio only) → retrieval → context assembly →
//! generation → response assembly.
//!
//! Retrieval is the only collaborator whose failure aborts a request.
//! Transcription and generation degrade to cached or templated output.

pub mod assembler;
pub mod normalizer;
pub mod orchestrator;
pub mod state;
pub mod stt;
pub mod transcription;

pub use assembler::ResponseAssembler;
pub use normalizer::{AudioFormat, InputNormalizer, NormalizerConfig};
pub use orchestrator::{Collaborators, HealthReport, HealthStatus, PipelineOrchestrator};
pub use state::{PipelineState, RequestRun};
pub use stt::{HttpSttBackend, SttBackend, SttError, SttOutput};
pub use transcription::{TranscriptionAdapter, TranscriptionCache, TranscriptionConfig};
