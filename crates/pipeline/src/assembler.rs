//! Final response assembly
//!
//! Pure function of its inputs: assembling twice from the same inputs gives
//! byte-identical serialized output.

use std::collections::{BTreeMap, BTreeSet};

use property_qa_core::{
    AssembledResponse, Degradation, LlmResponse, PropertyMatch, Query, Stage, TranscriptionResult,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAssembler;

impl ResponseAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Combine stage results into the response returned to the caller
    ///
    /// A stage is marked degraded when it recorded a [`Degradation`] or when
    /// its result came from a fallback engine.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        &self,
        query: &Query,
        transcription: Option<&TranscriptionResult>,
        matches: &[PropertyMatch],
        similar_suggestions: &[PropertyMatch],
        narrative: &LlmResponse,
        timings: &BTreeMap<Stage, u64>,
        degradations: &[Degradation],
    ) -> AssembledResponse {
        let mut degraded: BTreeSet<Stage> = degradations.iter().map(|d| d.stage).collect();
        if transcription.is_some_and(|t| t.is_fallback()) {
            degraded.insert(Stage::Transcription);
        }
        if narrative.is_fallback() {
            degraded.insert(Stage::Generation);
        }

        AssembledResponse {
            query: query.clone(),
            transcription: transcription.cloned(),
            matches: matches.to_vec(),
            similar_suggestions: similar_suggestions.to_vec(),
            narrative: narrative.text.clone(),
            timing_breakdown: timings.clone(),
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use property_qa_core::EngineSource;

    fn matches() -> Vec<PropertyMatch> {
        vec![
            PropertyMatch { property_id: 7, score: 0.91, rank: 1 },
            PropertyMatch { property_id: 3, score: 0.84, rank: 2 },
        ]
    }

    fn narrative(source: EngineSource) -> LlmResponse {
        LlmResponse {
            text: "Two villas match your search.".into(),
            tokens_used: 12,
            latency_ms: 40,
            source,
        }
    }

    fn timings() -> BTreeMap<Stage, u64> {
        BTreeMap::from([
            (Stage::Normalization, 1),
            (Stage::Retrieval, 35),
            (Stage::Generation, 40),
        ])
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let query = Query::from_text("3-bedroom villas in Dubai", "en");
        let assembler = ResponseAssembler::new();
        let degradations = vec![Degradation::new(Stage::SimilarityExpansion, "timeout")];

        let first = assembler.assemble(
            &query,
            None,
            &matches(),
            &[],
            &narrative(EngineSource::Live),
            &timings(),
            &degradations,
        );
        let second = assembler.assemble(
            &query,
            None,
            &matches(),
            &[],
            &narrative(EngineSource::Live),
            &timings(),
            &degradations,
        );

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.total_ms(), 76);
    }

    #[test]
    fn test_fallback_sources_mark_stages_degraded() {
        let query = Query::from_audio(property_qa_core::AudioClip::new(vec![1, 2, 3]), "en");
        let transcript = TranscriptionResult::fallback(query.id, "");

        let response = ResponseAssembler::new().assemble(
            &query,
            Some(&transcript),
            &[],
            &[],
            &narrative(EngineSource::Fallback),
            &timings(),
            &[],
        );

        assert_eq!(
            response.degraded,
            BTreeSet::from([Stage::Transcription, Stage::Generation])
        );
        assert!(response.transcription.is_some());
    }

    #[test]
    fn test_clean_run_is_not_degraded() {
        let query = Query::from_text("studio in Marina", "en");
        let response = ResponseAssembler::new().assemble(
            &query,
            None,
            &matches(),
            &[],
            &narrative(EngineSource::Live),
            &timings(),
            &[],
        );
        assert!(!response.is_degraded());
        assert_eq!(response.matches.len(), 2);
    }
}
