//! Pipeline orchestrator
//!
//! Drives one request through normalization, optional transcription,
//! retrieval, context assembly, generation and response assembly. Every
//! stage runs under its own budget, capped by the overall request deadline
//! counted from submission, so admission wait uses up part of it. A stage
//! reached after the deadline is skipped and marked degraded. Only
//! normalization and an attempted primary retrieval can fail a request;
//! everything else degrades.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

use property_qa_config::{PipelineConfig, Settings};
use property_qa_core::{
    AssembledResponse, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState, Error,
    PropertyId, RawRequest, Result, Stage,
};
use property_qa_llm::{GenerationAdapter, GenerationBackend, GenerationConfig};
use property_qa_rag::{
    fetch_details, ContextAssembler, ContextAssemblerConfig, EmbedAck, PropertyIndexer,
    PropertyStore, RagError, RetrievalCoordinator, RetrievalOutcome, RetrieverConfig,
    VectorSearch,
};

use crate::assembler::ResponseAssembler;
use crate::normalizer::{InputNormalizer, NormalizerConfig};
use crate::state::{PipelineState, RequestRun};
use crate::stt::SttBackend;
use crate::transcription::{TranscriptionAdapter, TranscriptionCache, TranscriptionConfig};

/// External collaborators the pipeline calls
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SttBackend>,
    pub vector_search: Arc<dyn VectorSearch>,
    pub property_store: Arc<dyn PropertyStore>,
    pub generation: Arc<dyn GenerationBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Aggregated breaker states and load
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub in_flight: usize,
    pub max_concurrency: usize,
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    normalizer: InputNormalizer,
    transcription: TranscriptionAdapter,
    retrieval: RetrievalCoordinator,
    property_store: Arc<dyn PropertyStore>,
    store_breaker: Arc<CircuitBreaker>,
    store_timeout: Duration,
    context: ContextAssembler,
    generation: GenerationAdapter,
    assembler: ResponseAssembler,
    indexer: PropertyIndexer,
    admission: Semaphore,
}

impl PipelineOrchestrator {
    pub fn new(settings: &Settings, collaborators: Collaborators) -> Self {
        let r = &settings.resilience;
        let breaker = |name: &str| {
            Arc::new(CircuitBreaker::new(
                name,
                BreakerConfig {
                    failure_threshold: r.failure_threshold,
                    cooldown: Duration::from_millis(r.cooldown_ms),
                    half_open_max_calls: r.half_open_max_calls,
                },
            ))
        };

        let transcription = TranscriptionAdapter::new(
            collaborators.stt,
            breaker("transcription"),
            TranscriptionCache::from(&settings.transcription_cache),
            TranscriptionConfig::from(settings),
        );
        let retrieval = RetrievalCoordinator::new(
            collaborators.vector_search.clone(),
            breaker("vector_search"),
            RetrieverConfig::from(settings),
        );
        let generation = GenerationAdapter::new(
            collaborators.generation,
            breaker("generation"),
            GenerationConfig::from(settings),
        );

        Self {
            config: settings.pipeline.clone(),
            normalizer: InputNormalizer::new(NormalizerConfig::from(settings)),
            transcription,
            retrieval,
            property_store: collaborators.property_store.clone(),
            store_breaker: breaker("property_store"),
            store_timeout: Duration::from_millis(settings.collaborators.property_store.timeout_ms),
            context: ContextAssembler::new(ContextAssemblerConfig::from(&settings.context)),
            generation,
            assembler: ResponseAssembler::new(),
            indexer: PropertyIndexer::new(collaborators.property_store, collaborators.vector_search),
            admission: Semaphore::new(settings.pipeline.max_concurrency.max(1)),
        }
    }

    /// Run one request to completion
    ///
    /// Waits for an admission permit first; a request that cannot get one
    /// within the admission timeout fails with [`Error::Overloaded`].
    pub async fn submit_query(&self, raw: RawRequest) -> Result<AssembledResponse> {
        let submitted = Instant::now();
        let _permit = match tokio::time::timeout(
            self.config.admission_timeout(),
            self.admission.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Internal("admission semaphore closed".to_string())),
            Err(_) => {
                tracing::warn!(
                    max_concurrency = self.config.max_concurrency,
                    waited_ms = self.config.admission_timeout_ms,
                    "Request rejected by admission control"
                );
                return Err(Error::Overloaded(format!(
                    "{} requests already in flight",
                    self.config.max_concurrency
                )));
            }
        };

        self.run(raw, submitted).await
    }

    /// Like [`Self::submit_query`], abandoning the request when `cancel`
    /// completes first
    ///
    /// The in-flight collaborator call is dropped with the pipeline future.
    pub async fn submit_query_until<C>(&self, raw: RawRequest, cancel: C) -> Result<AssembledResponse>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!("Request cancelled by caller");
                Err(Error::Cancelled)
            }
            result = self.submit_query(raw) => result,
        }
    }

    async fn run(&self, raw: RawRequest, submitted: Instant) -> Result<AssembledResponse> {
        let mut run = RequestRun::new(Uuid::nil());

        // Normalization
        run.transition(PipelineState::Normalizing);
        let started = run.stage_timer();
        let mut query = match self.normalizer.normalize(raw).await {
            Ok(query) => query,
            Err(err) => {
                tracing::error!(error = %err, "Request rejected during normalization");
                run.transition(PipelineState::Failed);
                return Err(err);
            }
        };
        run.bind_query(query.id);
        run.record_timing(Stage::Normalization, started);

        let deadline = submitted + self.config.overall_deadline(query.needs_transcription());

        // Transcription
        let transcription = match query.audio.clone().filter(|_| query.needs_transcription()) {
            Some(clip) => {
                run.transition(PipelineState::Transcribing);
                let started = run.stage_timer();
                let result = if Instant::now() >= deadline {
                    run.degrade(Stage::Transcription, "request deadline reached before stage");
                    self.transcription.fallback_for(query.id, &clip)
                } else {
                    let stage_deadline =
                        stage_deadline(started, self.config.transcription_budget_ms, deadline);
                    self.transcription
                        .transcribe(query.id, &clip, &query.language, stage_deadline)
                        .await
                };
                query.resolve_text(result.text());
                run.record_timing(Stage::Transcription, started);
                Some(result)
            }
            None => None,
        };

        // Retrieval
        run.transition(PipelineState::Retrieving);
        let query_text = query.resolved_text().unwrap_or_default().to_string();
        let outcome = if Instant::now() >= deadline {
            run.degrade(Stage::Retrieval, "request deadline reached before stage");
            RetrievalOutcome::default()
        } else if query_text.is_empty() {
            tracing::debug!(query_id = %query.id, "No transcript to search with, skipping retrieval");
            RetrievalOutcome::default()
        } else {
            let started = run.stage_timer();
            let stage_deadline = stage_deadline(started, self.config.retrieval_budget_ms, deadline);
            match self
                .retrieval
                .retrieve(&query_text, query.options.top_k, &query.options, stage_deadline)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    run.record_timing(Stage::Retrieval, started);
                    tracing::error!(query_id = %query.id, error = %err, "Request failed during retrieval");
                    run.transition(PipelineState::Failed);
                    return Err(err);
                }
            }
        };
        run.set_timing(Stage::Retrieval, outcome.primary_ms);
        if let Some(ms) = outcome.expansion_ms {
            run.set_timing(Stage::SimilarityExpansion, ms);
        }
        run.extend_degradations(outcome.degradations.iter().cloned());

        // Context assembly
        run.transition(PipelineState::AssemblingContext);
        let started = run.stage_timer();
        let ids: Vec<_> = outcome.matches.iter().map(|m| m.property_id).collect();
        let details = if Instant::now() >= deadline {
            run.degrade(Stage::ContextAssembly, "request deadline reached before detail lookup");
            BTreeMap::new()
        } else if ids.is_empty() {
            BTreeMap::new()
        } else {
            let stage_deadline = stage_deadline(started, self.config.context_budget_ms, deadline);
            let lookup = fetch_details(
                &self.property_store,
                &self.store_breaker,
                &ids,
                self.store_timeout,
                stage_deadline,
            )
            .await;
            if !lookup.is_complete() {
                run.degrade(
                    Stage::ContextAssembly,
                    format!(
                        "details unavailable for {} of {} matches",
                        lookup.failed.len(),
                        ids.len()
                    ),
                );
            }
            lookup.details
        };
        let prompt = self.context.assemble(&query_text, &outcome.matches, &details);
        run.record_timing(Stage::ContextAssembly, started);

        // Generation
        run.transition(PipelineState::Generating);
        let started = run.stage_timer();
        let narrative = if Instant::now() >= deadline {
            run.degrade(Stage::Generation, "request deadline reached before stage");
            self.generation.fallback(&prompt)
        } else if query_text.is_empty() {
            self.generation.fallback(&prompt)
        } else {
            let stage_deadline = stage_deadline(started, self.config.generation_budget_ms, deadline);
            self.generation.generate(&prompt, stage_deadline).await
        };
        run.record_timing(Stage::Generation, started);

        // Response assembly
        run.transition(PipelineState::AssemblingResponse);
        let started = run.stage_timer();
        let mut response = self.assembler.assemble(
            &query,
            transcription.as_ref(),
            &outcome.matches,
            &outcome.similar_suggestions,
            &narrative,
            run.timings(),
            run.degradations(),
        );
        let assembly_ms = started.elapsed().as_millis() as u64;
        run.set_timing(Stage::ResponseAssembly, assembly_ms);
        response.timing_breakdown.insert(Stage::ResponseAssembly, assembly_ms);
        run.transition(PipelineState::Completed);

        tracing::info!(
            query_id = %query.id,
            kind = %query.raw_kind,
            matches = response.matches.len(),
            degraded = response.degraded.len(),
            elapsed_ms = run.elapsed_ms(),
            "Query completed"
        );
        Ok(response)
    }

    /// Breaker states of every collaborator
    pub fn health(&self) -> HealthReport {
        let breakers: Vec<BreakerSnapshot> = [
            self.transcription.breaker(),
            self.retrieval.breaker(),
            &self.store_breaker,
            self.generation.breaker(),
        ]
        .iter()
        .map(|b| b.snapshot())
        .collect();

        let status = if breakers.iter().all(|b| b.state == CircuitState::Closed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let max_concurrency = self.config.max_concurrency.max(1);

        HealthReport {
            status,
            breakers,
            in_flight: max_concurrency.saturating_sub(self.admission.available_permits()),
            max_concurrency,
        }
    }

    /// Ready unless the retrieval breaker is open
    pub fn ready(&self) -> bool {
        !self.retrieval.breaker().is_open()
    }

    /// Embed one stored listing into the vector search collaborator
    pub async fn index_property(&self, property_id: PropertyId) -> std::result::Result<EmbedAck, RagError> {
        self.indexer.index(property_id).await
    }
}

fn stage_deadline(started: Instant, budget_ms: u64, overall: Instant) -> Instant {
    (started + Duration::from_millis(budget_ms)).min(overall)
}
