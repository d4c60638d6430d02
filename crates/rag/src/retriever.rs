//! Retrieval coordination
//!
//! One request makes at most two calls to the vector search collaborator
//! under a shared deadline:
//! 1. primary search against the query text, retried per policy;
//! 2. similarity expansion seeded on the top match, single attempt.
//!
//! Only the primary call can fail the request.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use property_qa_config::Settings;
use property_qa_core::{
    rank_matches, CallError, CircuitBreaker, Degradation, Error, PropertyMatch, QueryOptions,
    ResilientCall, RetryPolicy, Stage,
};

use crate::vector_search::VectorSearch;
use crate::RagError;

/// Retrieval configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Per-call timeout for primary search
    pub search_timeout: Duration,
    /// Per-call timeout for similarity expansion
    pub expansion_timeout: Duration,
    /// Suggestions kept after expansion
    pub similar_limit: usize,
    /// Drop suggestions that are already primary matches
    pub exclude_primary_from_similar: bool,
    /// Retry policy for primary search
    pub retry: RetryPolicy,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for RetrieverConfig {
    fn from(settings: &Settings) -> Self {
        let r = &settings.resilience;
        Self {
            search_timeout: Duration::from_millis(settings.collaborators.vector_search.timeout_ms),
            expansion_timeout: Duration::from_millis(settings.retrieval.expansion_timeout_ms),
            similar_limit: settings.retrieval.similar_limit,
            exclude_primary_from_similar: settings.retrieval.exclude_primary_from_similar,
            retry: RetryPolicy {
                max_retries: r.retrieval_max_retries,
                initial_backoff: Duration::from_millis(r.initial_backoff_ms),
                max_backoff: Duration::from_millis(r.max_backoff_ms),
                retry_on_timeout: true,
            },
        }
    }
}

/// Matches, suggestions and what happened along the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    pub matches: Vec<PropertyMatch>,
    pub similar_suggestions: Vec<PropertyMatch>,
    pub degradations: Vec<Degradation>,
    pub primary_ms: u64,
    /// Set when the expansion call was attempted
    pub expansion_ms: Option<u64>,
}

/// Coordinates primary search and similarity expansion
pub struct RetrievalCoordinator {
    search: Arc<dyn VectorSearch>,
    breaker: Arc<CircuitBreaker>,
    config: RetrieverConfig,
}

impl RetrievalCoordinator {
    pub fn new(
        search: Arc<dyn VectorSearch>,
        breaker: Arc<CircuitBreaker>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            search,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve up to `top_k` matches and, if requested, similar suggestions
    ///
    /// Fails with [`Error::RetrievalUnavailable`] only when the primary call
    /// is exhausted. Expansion problems become degradations.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        options: &QueryOptions,
        deadline: Instant,
    ) -> Result<RetrievalOutcome, Error> {
        let started = Instant::now();
        let call = ResilientCall::new(
            &self.breaker,
            &self.config.retry,
            self.config.search_timeout,
            deadline,
        );

        let hits = call
            .run(|| self.search.search(query_text, top_k))
            .await
            .map_err(|err| {
                let reason = describe(&err);
                tracing::error!(
                    collaborator = %self.search.name(),
                    attempts = err.attempts(),
                    error = %reason,
                    "Primary retrieval failed"
                );
                Error::RetrievalUnavailable(reason)
            })?;

        let mut outcome = RetrievalOutcome {
            matches: rank_matches(hits, top_k),
            primary_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        tracing::debug!(
            matches = outcome.matches.len(),
            elapsed_ms = outcome.primary_ms,
            "Primary retrieval complete"
        );

        if !options.include_similar {
            return Ok(outcome);
        }
        let seed = match outcome.matches.first() {
            Some(top) => top.property_id,
            None => return Ok(outcome),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < self.config.expansion_timeout {
            tracing::debug!(
                remaining_ms = remaining.as_millis() as u64,
                "Skipping similarity expansion, budget exhausted"
            );
            if options.require_similar {
                outcome.degradations.push(Degradation::new(
                    Stage::SimilarityExpansion,
                    "skipped: insufficient retrieval budget",
                ));
            }
            return Ok(outcome);
        }

        let expansion_started = Instant::now();
        let no_retry = RetryPolicy::no_retry();
        let call = ResilientCall::new(
            &self.breaker,
            &no_retry,
            self.config.expansion_timeout,
            deadline,
        );
        let mut limit = self.config.similar_limit + 1;
        if self.config.exclude_primary_from_similar {
            limit += outcome.matches.len();
        }

        match call.run(|| self.search.similarity(seed, limit)).await {
            Ok(hits) => {
                let primary = &outcome.matches;
                let exclude_primary = self.config.exclude_primary_from_similar;
                let candidates = hits.into_iter().filter(|hit| {
                    hit.property_id != seed
                        && !(exclude_primary
                            && primary.iter().any(|m| m.property_id == hit.property_id))
                });
                outcome.similar_suggestions = rank_matches(candidates, self.config.similar_limit);
            }
            Err(err) => {
                let reason = describe(&err);
                tracing::warn!(
                    stage = %Stage::SimilarityExpansion,
                    seed,
                    reason = %reason,
                    "Similarity expansion degraded"
                );
                outcome
                    .degradations
                    .push(Degradation::new(Stage::SimilarityExpansion, reason));
            }
        }
        outcome.expansion_ms = Some(expansion_started.elapsed().as_millis() as u64);

        Ok(outcome)
    }
}

fn describe(err: &CallError<RagError>) -> String {
    match err {
        CallError::Failed { error, attempts } => {
            format!("{} (after {} attempt(s))", error, attempts)
        }
        other => other.to_string(),
    }
}
