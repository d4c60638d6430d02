//! End-to-end orchestrator tests against in-process collaborators

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use property_qa_config::Settings;
use property_qa_core::{
    AudioClip, AudioRef, CircuitState, EngineSource, LlmPrompt, PropertyDetails, PropertyId,
    RawRequest, ScoredProperty, Stage,
};
use property_qa_llm::{GenerationBackend, GenerationOutput, LlmError};
use property_qa_pipeline::{
    Collaborators, HealthStatus, PipelineOrchestrator, SttBackend, SttError, SttOutput,
};
use property_qa_rag::{EmbedAck, InMemoryPropertyStore, PropertyStore, RagError, VectorSearch};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Ok,
    Fail,
    Hang,
}

struct ScriptedSearch {
    search_mode: Mutex<Mode>,
    similarity_mode: Mutex<Mode>,
    search_calls: AtomicU32,
}

impl ScriptedSearch {
    fn new() -> Self {
        Self {
            search_mode: Mutex::new(Mode::Ok),
            similarity_mode: Mutex::new(Mode::Ok),
            search_calls: AtomicU32::new(0),
        }
    }
}

async fn act<T>(mode: Mode, ok: T, err: impl FnOnce() -> T) -> T {
    match mode {
        Mode::Ok => ok,
        Mode::Fail => err(),
        Mode::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            err()
        }
    }
}

#[async_trait]
impl VectorSearch for ScriptedSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<ScoredProperty>, RagError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.search_mode.lock();
        let hits = vec![ScoredProperty::new(7, 0.91), ScoredProperty::new(3, 0.84)]
            .into_iter()
            .take(limit)
            .collect();
        act(mode, Ok(hits), || Err(RagError::Connection("refused".into()))).await
    }

    async fn similarity(
        &self,
        property_id: PropertyId,
        limit: usize,
    ) -> Result<Vec<ScoredProperty>, RagError> {
        let mode = *self.similarity_mode.lock();
        let hits = [(7, 0.99), (3, 0.88), (5, 0.72), (2, 0.65), (1, 0.41)]
            .into_iter()
            .filter(|(id, _)| *id != property_id)
            .map(|(id, score)| ScoredProperty::new(id, score))
            .take(limit)
            .collect();
        act(mode, Ok(hits), || Err(RagError::Connection("refused".into()))).await
    }

    async fn embed(&self, property_id: PropertyId, _text: &str) -> Result<EmbedAck, RagError> {
        Ok(EmbedAck {
            property_id,
            embedding_id: Some(property_id),
            vector_size: 384,
        })
    }

    fn name(&self) -> &str {
        "scripted_search"
    }
}

struct ScriptedGeneration {
    mode: Mutex<Mode>,
    calls: AtomicU32,
}

#[async_trait]
impl GenerationBackend for ScriptedGeneration {
    async fn generate(&self, prompt: &LlmPrompt) -> Result<GenerationOutput, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        let ok = Ok(GenerationOutput {
            text: format!(
                "I found {} properties for \"{}\".",
                prompt.context_snippets.len(),
                prompt.query_text
            ),
            tokens_used: 42,
        });
        act(mode, ok, || Err(LlmError::Network("connection reset".into()))).await
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedStt {
    mode: Mutex<Mode>,
    calls: AtomicU32,
}

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, _audio: &AudioClip, _language: &str) -> Result<SttOutput, SttError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        let ok = Ok(SttOutput {
            text: "3-bedroom villas in Dubai".into(),
            confidence: 0.93,
        });
        act(mode, ok, || Err(SttError::Network("refused".into()))).await
    }

    fn name(&self) -> &str {
        "scripted_stt"
    }
}

fn listing(id: PropertyId, title: &str, price: f64, location: &str) -> PropertyDetails {
    PropertyDetails {
        id,
        title: title.to_string(),
        price,
        currency: "AED".to_string(),
        bedrooms: 3,
        bathrooms: 3,
        area: 2400.0,
        property_type: "Villa".to_string(),
        location: location.to_string(),
        description: format!("{} with private garden", title),
        amenities: vec!["Pool".into(), "Gym".into(), "Parking".into()],
        url: None,
    }
}

struct Harness {
    search: Arc<ScriptedSearch>,
    generation: Arc<ScriptedGeneration>,
    stt: Arc<ScriptedStt>,
    store: Arc<InMemoryPropertyStore>,
    orchestrator: PipelineOrchestrator,
}

fn harness_with(settings: Settings) -> Harness {
    let search = Arc::new(ScriptedSearch::new());
    let generation = Arc::new(ScriptedGeneration {
        mode: Mutex::new(Mode::Ok),
        calls: AtomicU32::new(0),
    });
    let stt = Arc::new(ScriptedStt {
        mode: Mutex::new(Mode::Ok),
        calls: AtomicU32::new(0),
    });
    let store = Arc::new(InMemoryPropertyStore::new([
        listing(7, "Jumeirah Village Pool Villa", 1_890_000.0, "Jumeirah Village Circle"),
        listing(3, "Dubai Hills Estate Family Villa", 4_250_000.0, "Dubai Hills Estate"),
        listing(5, "Arabian Ranches Townhouse", 2_100_000.0, "Arabian Ranches"),
        listing(2, "Marina Sky Apartment", 1_450_000.0, "Dubai Marina"),
    ]));

    let orchestrator = PipelineOrchestrator::new(
        &settings,
        Collaborators {
            stt: stt.clone(),
            vector_search: search.clone(),
            property_store: store.clone() as Arc<dyn PropertyStore>,
            generation: generation.clone(),
        },
    );

    Harness {
        search,
        generation,
        stt,
        store,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(Settings::default())
}

fn wav_bytes() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..1600 {
            writer.write_sample((i % 64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_text_query_end_to_end() {
    let h = harness();
    let response = h
        .orchestrator
        .submit_query(RawRequest::text("3-bedroom villas in Dubai"))
        .await
        .unwrap();

    let ids: Vec<_> = response.matches.iter().map(|m| m.property_id).collect();
    assert_eq!(ids, vec![7, 3]);
    assert_eq!(response.matches[0].rank, 1);
    assert_eq!(response.matches[1].rank, 2);

    assert!(!response.similar_suggestions.is_empty());
    assert!(response.similar_suggestions.iter().all(|m| m.property_id != 7));

    assert!(!response.is_degraded(), "degraded: {:?}", response.degraded);
    assert_eq!(response.narrative, "I found 2 properties for \"3-bedroom villas in Dubai\".");
    assert!(response.transcription.is_none());
    for stage in [
        Stage::Normalization,
        Stage::Retrieval,
        Stage::SimilarityExpansion,
        Stage::ContextAssembly,
        Stage::Generation,
        Stage::ResponseAssembly,
    ] {
        assert!(response.timing_breakdown.contains_key(&stage), "missing {}", stage);
    }
    assert!(!response.timing_breakdown.contains_key(&Stage::Transcription));
}

#[tokio::test(start_paused = true)]
async fn test_without_similar_skips_expansion() {
    let h = harness();
    let response = h
        .orchestrator
        .submit_query(RawRequest::text("villa").without_similar())
        .await
        .unwrap();
    assert!(response.similar_suggestions.is_empty());
    assert!(!response.degraded.contains(&Stage::SimilarityExpansion));
    assert!(!response.timing_breakdown.contains_key(&Stage::SimilarityExpansion));
}

#[tokio::test(start_paused = true)]
async fn test_audio_file_query_is_transcribed() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.wav");
    std::fs::write(&path, wav_bytes()).unwrap();

    let response = h
        .orchestrator
        .submit_query(RawRequest::audio(AudioRef::File(path)))
        .await
        .unwrap();

    let transcript = response.transcription.as_ref().unwrap();
    assert_eq!(transcript.engine_source(), EngineSource::Live);
    assert_eq!(response.query.text.as_deref(), Some("3-bedroom villas in Dubai"));
    assert_eq!(response.matches.len(), 2);
    assert!(response.timing_breakdown.contains_key(&Stage::Transcription));
    assert!(!response.is_degraded());
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_transcription_failure_degrades() {
    let h = harness();
    *h.stt.mode.lock() = Mode::Fail;

    let response = h
        .orchestrator
        .submit_query(RawRequest::audio(AudioRef::Inline(wav_bytes())))
        .await
        .unwrap();

    assert!(response.degraded.contains(&Stage::Transcription));
    let transcript = response.transcription.as_ref().unwrap();
    assert!(transcript.is_fallback());
    assert_eq!(transcript.confidence(), 0.0);
    assert!(response.matches.is_empty());
    assert!(!response.narrative.is_empty());
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transcription_failure_reuses_cached_transcript() {
    let h = harness();
    let audio = wav_bytes();
    h.orchestrator
        .submit_query(RawRequest::audio(AudioRef::Inline(audio.clone())))
        .await
        .unwrap();

    *h.stt.mode.lock() = Mode::Fail;
    let response = h
        .orchestrator
        .submit_query(RawRequest::audio(AudioRef::Inline(audio)))
        .await
        .unwrap();

    assert!(response.degraded.contains(&Stage::Transcription));
    assert_eq!(response.transcription.as_ref().unwrap().text(), "3-bedroom villas in Dubai");
    assert_eq!(response.matches.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generation_failure_uses_template_with_titles() {
    let h = harness();
    *h.generation.mode.lock() = Mode::Fail;

    let response = h
        .orchestrator
        .submit_query(RawRequest::text("3-bedroom villas in Dubai"))
        .await
        .unwrap();

    assert!(response.degraded.contains(&Stage::Generation));
    assert_eq!(response.matches.len(), 2);
    assert!(response.narrative.contains("Jumeirah Village Pool Villa"));
    assert!(response.narrative.contains("Dubai Hills Estate Family Villa"));
    let first = response.narrative.find("Jumeirah").unwrap();
    let second = response.narrative.find("Dubai Hills").unwrap();
    assert!(first < second);
}

#[tokio::test(start_paused = true)]
async fn test_expansion_failure_is_not_fatal() {
    let h = harness();
    *h.search.similarity_mode.lock() = Mode::Fail;

    let response = h
        .orchestrator
        .submit_query(RawRequest::text("villa"))
        .await
        .unwrap();

    assert_eq!(response.matches.len(), 2);
    assert!(response.similar_suggestions.is_empty());
    assert_eq!(
        response.degraded.iter().copied().collect::<Vec<_>>(),
        vec![Stage::SimilarityExpansion]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_details_render_minimal_snippet() {
    let h = harness();
    let store = Arc::new(InMemoryPropertyStore::new([listing(
        7,
        "Jumeirah Village Pool Villa",
        1_890_000.0,
        "Jumeirah Village Circle",
    )]));
    let orchestrator = PipelineOrchestrator::new(
        &Settings::default(),
        Collaborators {
            stt: h.stt.clone(),
            vector_search: h.search.clone(),
            property_store: store,
            generation: h.generation.clone(),
        },
    );
    *h.generation.mode.lock() = Mode::Fail;

    let response = orchestrator
        .submit_query(RawRequest::text("villa").without_similar())
        .await
        .unwrap();

    assert!(response.degraded.contains(&Stage::ContextAssembly));
    assert!(response.narrative.contains("Jumeirah Village Pool Villa"));
    assert!(response.narrative.contains("Property #3 (details unavailable)"));
}

// ---------------------------------------------------------------------------
// Fatal paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .submit_query(RawRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let err = h
        .orchestrator
        .submit_query(RawRequest::audio(AudioRef::Inline(b"not audio at all".to_vec())))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retrieval_failure_is_fatal_after_retries() {
    let h = harness();
    *h.search.search_mode.lock() = Mode::Fail;

    let err = h
        .orchestrator
        .submit_query(RawRequest::text("villa"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "RETRIEVAL_UNAVAILABLE");
    let retries = Settings::default().resilience.retrieval_max_retries;
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), retries + 1);
    assert_eq!(h.generation.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Deadlines and breakers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_hanging_generation_respects_deadline() {
    let settings = Settings::default();
    let overall = settings.pipeline.overall_deadline(false);
    let h = harness_with(settings);
    *h.generation.mode.lock() = Mode::Hang;

    let started = Instant::now();
    let response = h
        .orchestrator
        .submit_query(RawRequest::text("villa"))
        .await
        .unwrap();

    assert!(started.elapsed() <= overall);
    assert!(response.degraded.contains(&Stage::Generation));
    assert!(response.narrative.contains("Jumeirah Village Pool Villa"));
}

#[tokio::test(start_paused = true)]
async fn test_generation_breaker_short_circuits() {
    let mut settings = Settings::default();
    settings.resilience.failure_threshold = 2;
    let h = harness_with(settings);
    *h.generation.mode.lock() = Mode::Fail;

    // first request: one attempt plus one retry, both failing
    let first = h.orchestrator.submit_query(RawRequest::text("villa")).await.unwrap();
    assert!(first.degraded.contains(&Stage::Generation));
    assert_eq!(h.generation.calls.load(Ordering::SeqCst), 2);

    let health = h.orchestrator.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    let generation = health.breakers.iter().find(|b| b.name == "generation").unwrap();
    assert_eq!(generation.state, CircuitState::Open);
    assert!(h.orchestrator.ready());

    let started = Instant::now();
    let second = h.orchestrator.submit_query(RawRequest::text("villa")).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(h.generation.calls.load(Ordering::SeqCst), 2);
    assert!(second.degraded.contains(&Stage::Generation));
    assert_eq!(second.timing_breakdown[&Stage::Generation], 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_retrieval_breaker_fails_readiness() {
    let mut settings = Settings::default();
    settings.resilience.failure_threshold = 1;
    settings.resilience.retrieval_max_retries = 0;
    let h = harness_with(settings);
    *h.search.search_mode.lock() = Mode::Fail;

    assert!(h.orchestrator.ready());
    let _ = h.orchestrator.submit_query(RawRequest::text("villa")).await;
    assert!(!h.orchestrator.ready());

    let err = h
        .orchestrator
        .submit_query(RawRequest::text("villa"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RETRIEVAL_UNAVAILABLE");
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_half_open_retrieval_lets_breaker_recover() {
    let mut settings = Settings::default();
    settings.resilience.failure_threshold = 1;
    settings.resilience.retrieval_max_retries = 0;
    let cooldown = Duration::from_millis(settings.resilience.cooldown_ms);
    let h = harness_with(settings);

    *h.search.search_mode.lock() = Mode::Fail;
    let err = h.orchestrator.submit_query(RawRequest::text("villa")).await.unwrap_err();
    assert_eq!(err.code(), "RETRIEVAL_UNAVAILABLE");
    assert!(!h.orchestrator.ready());

    // first call after the cooldown hangs and its caller gives up
    tokio::time::advance(cooldown + Duration::from_secs(1)).await;
    *h.search.search_mode.lock() = Mode::Hang;
    let err = h
        .orchestrator
        .submit_query_until(
            RawRequest::text("villa"),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CANCELLED");
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 2);

    *h.search.search_mode.lock() = Mode::Ok;
    let response = h
        .orchestrator
        .submit_query(RawRequest::text("villa"))
        .await
        .unwrap();

    assert_eq!(response.matches.len(), 2);
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 3);
    assert!(h.orchestrator.ready());
    let health = h.orchestrator.health();
    let search = health.breakers.iter().find(|b| b.name == "vector_search").unwrap();
    assert_eq!(search.state, CircuitState::Closed);
}

// ---------------------------------------------------------------------------
// Overall deadline
// ---------------------------------------------------------------------------

/// One execution slot with a generous admission wait, so queued requests
/// spend their overall deadline waiting for it
fn single_slot_settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.max_concurrency = 1;
    settings.pipeline.admission_timeout_ms = 60_000;
    settings.pipeline.transcription_budget_ms = 1_000;
    settings.pipeline.retrieval_budget_ms = 100;
    settings.pipeline.context_budget_ms = 100;
    settings.pipeline.generation_budget_ms = 300;
    settings
}

#[tokio::test(start_paused = true)]
async fn test_text_request_queued_past_deadline_degrades_without_calls() {
    let settings = single_slot_settings();
    let text_deadline = settings.pipeline.overall_deadline(false);
    let h = harness_with(settings);
    *h.stt.mode.lock() = Mode::Hang;

    let submitted = Instant::now();
    let ((first, first_elapsed), (second, second_elapsed)) = tokio::join!(
        async {
            let result = h
                .orchestrator
                .submit_query(RawRequest::audio(AudioRef::Inline(wav_bytes())))
                .await;
            (result, submitted.elapsed())
        },
        async {
            let result = h.orchestrator.submit_query(RawRequest::text("villa")).await;
            (result, submitted.elapsed())
        },
    );

    let first = first.unwrap();
    assert!(first.degraded.contains(&Stage::Transcription));
    assert!(first_elapsed > text_deadline);

    let second = second.unwrap();
    assert_eq!(
        second.degraded,
        BTreeSet::from([Stage::Retrieval, Stage::ContextAssembly, Stage::Generation])
    );
    assert!(second.matches.is_empty());
    assert!(!second.narrative.is_empty());
    assert_eq!(second.timing_breakdown[&Stage::Generation], 0);
    assert!(second_elapsed <= first_elapsed + Duration::from_millis(10));

    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.generation.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_audio_request_queued_past_deadline_skips_transcription() {
    let settings = single_slot_settings();
    let audio_deadline = settings.pipeline.overall_deadline(true);
    let h = harness_with(settings);
    *h.stt.mode.lock() = Mode::Hang;

    let submitted = Instant::now();
    let audio = || RawRequest::audio(AudioRef::Inline(wav_bytes()));
    let timed = |raw: RawRequest| {
        let orchestrator = &h.orchestrator;
        async move {
            let result = orchestrator.submit_query(raw).await;
            (result, submitted.elapsed())
        }
    };
    let (_, (second, second_elapsed), (third, third_elapsed)) =
        tokio::join!(timed(audio()), timed(audio()), timed(audio()));

    // the second request gets the slot in time to call STT but hits the
    // deadline before retrieval
    let second = second.unwrap();
    assert!(second.degraded.contains(&Stage::Transcription));
    assert!(second.degraded.contains(&Stage::Retrieval));
    assert!(second_elapsed <= audio_deadline + Duration::from_millis(10));

    let third = third.unwrap();
    for stage in [
        Stage::Transcription,
        Stage::Retrieval,
        Stage::ContextAssembly,
        Stage::Generation,
    ] {
        assert!(third.degraded.contains(&stage), "missing {}", stage);
    }
    assert!(third.transcription.as_ref().unwrap().is_fallback());
    assert_eq!(third.timing_breakdown[&Stage::Transcription], 0);
    assert!(third_elapsed <= audio_deadline + Duration::from_millis(10));

    assert_eq!(h.stt.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Admission and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_admission_control_rejects_when_saturated() {
    let mut settings = Settings::default();
    settings.pipeline.max_concurrency = 1;
    settings.pipeline.admission_timeout_ms = 50;
    let h = harness_with(settings);
    *h.generation.mode.lock() = Mode::Hang;

    let (first, second) = tokio::join!(
        h.orchestrator.submit_query(RawRequest::text("villa")),
        h.orchestrator.submit_query(RawRequest::text("apartment")),
    );

    assert!(first.is_ok());
    assert_eq!(second.unwrap_err().code(), "OVERLOADED");
    assert_eq!(h.orchestrator.health().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_discards_request() {
    let h = harness();
    *h.generation.mode.lock() = Mode::Hang;

    let err = h
        .orchestrator
        .submit_query_until(
            RawRequest::text("villa"),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "CANCELLED");
    assert_eq!(h.generation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.health().in_flight, 0);
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_index_property_uses_store_row() {
    let h = harness();
    assert_eq!(h.store.len(), 4);
    let ack = h.orchestrator.index_property(5).await.unwrap();
    assert_eq!(ack.property_id, 5);

    let err = h.orchestrator.index_property(99).await.unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
}
