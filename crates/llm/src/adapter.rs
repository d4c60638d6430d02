//! Resilient generation adapter
//!
//! Wraps one backend call with a per-call timeout, at most one retry on
//! transient transport failure and the generation circuit breaker. Any
//! failure yields a templated fallback, so a narrative is always produced.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use property_qa_config::Settings;
use property_qa_core::{
    CallError, CircuitBreaker, EngineSource, LlmPrompt, LlmResponse, ResilientCall, RetryPolicy,
    Stage,
};

use crate::backend::GenerationBackend;
use crate::fallback::fallback_narrative;

/// Generation adapter configuration
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Per-call timeout
    pub call_timeout: Duration,
    /// Retry policy, capped at one retry
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for GenerationConfig {
    fn from(settings: &Settings) -> Self {
        let r = &settings.resilience;
        Self {
            call_timeout: Duration::from_millis(settings.collaborators.generation.timeout_ms),
            retry: RetryPolicy {
                max_retries: r.adapter_max_retries.min(1),
                initial_backoff: Duration::from_millis(r.initial_backoff_ms),
                max_backoff: Duration::from_millis(r.max_backoff_ms),
                retry_on_timeout: false,
            },
        }
    }
}

pub struct GenerationAdapter {
    backend: Arc<dyn GenerationBackend>,
    breaker: Arc<CircuitBreaker>,
    config: GenerationConfig,
}

impl GenerationAdapter {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        breaker: Arc<CircuitBreaker>,
        config: GenerationConfig,
    ) -> Self {
        let mut config = config;
        config.retry.max_retries = config.retry.max_retries.min(1);
        Self {
            backend,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Generate a narrative for `prompt`, falling back to the template
    pub async fn generate(&self, prompt: &LlmPrompt, deadline: Instant) -> LlmResponse {
        let started = Instant::now();
        let call = ResilientCall::new(
            &self.breaker,
            &self.config.retry,
            self.config.call_timeout,
            deadline,
        );

        match call.run(|| self.backend.generate(prompt)).await {
            Ok(output) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(
                    model = %self.backend.model_name(),
                    tokens = output.tokens_used,
                    latency_ms,
                    "Generation complete"
                );
                LlmResponse {
                    text: output.text,
                    tokens_used: output.tokens_used,
                    latency_ms,
                    source: EngineSource::Live,
                }
            }
            Err(err) => {
                let reason = match &err {
                    CallError::Failed { error, attempts } => {
                        format!("{} (after {} attempt(s))", error, attempts)
                    }
                    other => other.to_string(),
                };
                tracing::warn!(
                    stage = %Stage::Generation,
                    model = %self.backend.model_name(),
                    reason = %reason,
                    "Generation degraded to templated fallback"
                );
                let mut response = self.fallback(prompt);
                response.latency_ms = started.elapsed().as_millis() as u64;
                response
            }
        }
    }

    /// Templated response without calling the backend
    pub fn fallback(&self, prompt: &LlmPrompt) -> LlmResponse {
        LlmResponse {
            text: fallback_narrative(prompt),
            tokens_used: 0,
            latency_ms: 0,
            source: EngineSource::Fallback,
        }
    }
}
