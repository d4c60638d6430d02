//! Assembled response and pipeline stages

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::property::PropertyMatch;
use crate::query::Query;
use crate::transcript::TranscriptionResult;

/// Pipeline stage names used for timings and degradation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalization,
    Transcription,
    Retrieval,
    SimilarityExpansion,
    ContextAssembly,
    Generation,
    ResponseAssembly,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Normalization,
        Stage::Transcription,
        Stage::Retrieval,
        Stage::SimilarityExpansion,
        Stage::ContextAssembly,
        Stage::Generation,
        Stage::ResponseAssembly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalization => "normalization",
            Stage::Transcription => "transcription",
            Stage::Retrieval => "retrieval",
            Stage::SimilarityExpansion => "similarity_expansion",
            Stage::ContextAssembly => "context_assembly",
            Stage::Generation => "generation",
            Stage::ResponseAssembly => "response_assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal substitution of a fallback result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub stage: Stage,
    pub reason: String,
}

impl Degradation {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Final response returned across the system boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledResponse {
    pub query: Query,
    /// Present for audio queries
    pub transcription: Option<TranscriptionResult>,
    pub matches: Vec<PropertyMatch>,
    pub similar_suggestions: Vec<PropertyMatch>,
    pub narrative: String,
    /// Milliseconds spent per stage
    pub timing_breakdown: BTreeMap<Stage, u64>,
    pub degraded: BTreeSet<Stage>,
}

impl AssembledResponse {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn total_ms(&self) -> u64 {
        self.timing_breakdown.values().sum()
    }
}
