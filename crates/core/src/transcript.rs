//! Transcription result types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a stage result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineSource {
    /// Produced by the live collaborator
    Live,
    /// Produced locally after the collaborator failed
    Fallback,
}

/// Outcome of transcribing an audio query
///
/// Immutable once created. Confidence is always in `[0, 1]` and is exactly
/// zero for fallback results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResult {
    query_id: Uuid,
    text: String,
    confidence: f32,
    engine_source: EngineSource,
}

impl TranscriptionResult {
    pub fn live(query_id: Uuid, text: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            query_id,
            text: text.into(),
            confidence,
            engine_source: EngineSource::Live,
        }
    }

    pub fn fallback(query_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            query_id,
            text: text.into(),
            confidence: 0.0,
            engine_source: EngineSource::Fallback,
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn engine_source(&self) -> EngineSource {
        self.engine_source
    }

    pub fn is_fallback(&self) -> bool {
        self.engine_source == EngineSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_confidence_clamped() {
        let id = Uuid::new_v4();
        assert_eq!(TranscriptionResult::live(id, "hi", 1.4).confidence(), 1.0);
        assert_eq!(TranscriptionResult::live(id, "hi", -2.0).confidence(), 0.0);
        assert_eq!(TranscriptionResult::live(id, "hi", f32::NAN).confidence(), 0.0);
    }

    #[test]
    fn test_fallback_has_zero_confidence() {
        let result = TranscriptionResult::fallback(Uuid::new_v4(), "cached");
        assert!(result.is_fallback());
        assert_eq!(result.confidence(), 0.0);
        assert_eq!(result.text(), "cached");
    }
}
