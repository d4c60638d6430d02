//! Pipeline budgets and admission control

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{admission, budgets, retrieval};

/// Per-stage budgets, concurrency and query defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Budget for the transcription stage (audio queries only)
    #[serde(default = "default_transcription_budget")]
    pub transcription_budget_ms: u64,

    /// Budget shared by primary retrieval and similarity expansion
    #[serde(default = "default_retrieval_budget")]
    pub retrieval_budget_ms: u64,

    /// Budget for property lookups and prompt construction
    #[serde(default = "default_context_budget")]
    pub context_budget_ms: u64,

    #[serde(default = "default_generation_budget")]
    pub generation_budget_ms: u64,

    /// Maximum requests executing at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How long a request may wait for an execution slot
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout_ms: u64,

    /// Primary matches when the caller does not ask for a count
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper clamp for caller-requested match counts
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_transcription_budget() -> u64 {
    budgets::TRANSCRIPTION_MS
}
fn default_retrieval_budget() -> u64 {
    budgets::RETRIEVAL_MS
}
fn default_context_budget() -> u64 {
    budgets::CONTEXT_ASSEMBLY_MS
}
fn default_generation_budget() -> u64 {
    budgets::GENERATION_MS
}
fn default_max_concurrency() -> usize {
    admission::MAX_CONCURRENCY
}
fn default_admission_timeout() -> u64 {
    admission::ADMISSION_TIMEOUT_MS
}
fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}
fn default_max_top_k() -> usize {
    retrieval::MAX_TOP_K
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transcription_budget_ms: default_transcription_budget(),
            retrieval_budget_ms: default_retrieval_budget(),
            context_budget_ms: default_context_budget(),
            generation_budget_ms: default_generation_budget(),
            max_concurrency: default_max_concurrency(),
            admission_timeout_ms: default_admission_timeout(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

impl PipelineConfig {
    /// Overall request deadline, the sum of stage budgets
    ///
    /// Text queries never run transcription, so its budget is left out.
    pub fn overall_deadline(&self, with_transcription: bool) -> Duration {
        let mut total = self.retrieval_budget_ms + self.context_budget_ms + self.generation_budget_ms;
        if with_transcription {
            total += self.transcription_budget_ms;
        }
        Duration::from_millis(total)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    /// Resolve a caller-requested match count
    pub fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }
}
