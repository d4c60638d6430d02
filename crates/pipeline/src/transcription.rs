//! Transcription adapter with a bounded last-good cache
//!
//! Every successful transcript is cached under the audio signature. When the
//! collaborator fails, the cached text for the same signature is reused with
//! zero confidence, or an empty transcript if there is none.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::time::Instant;
use uuid::Uuid;

use property_qa_config::{Settings, TranscriptionCacheConfig};
use property_qa_core::{
    AudioClip, CallError, CircuitBreaker, ResilientCall, RetryPolicy, Stage, TranscriptionResult,
};

use crate::stt::SttBackend;

/// Size and time bounded cache of transcripts keyed by audio signature
#[derive(Clone)]
pub struct TranscriptionCache {
    inner: Cache<String, String>,
}

impl TranscriptionCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, signature: &str) -> Option<String> {
        self.inner.get(signature)
    }

    pub fn insert(&self, signature: &str, text: &str) {
        self.inner.insert(signature.to_string(), text.to_string());
    }

    /// Approximate number of cached transcripts
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl From<&TranscriptionCacheConfig> for TranscriptionCache {
    fn from(config: &TranscriptionCacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }
}

/// Transcription adapter configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub call_timeout: Duration,
    /// Capped at one retry
    pub retry: RetryPolicy,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for TranscriptionConfig {
    fn from(settings: &Settings) -> Self {
        let r = &settings.resilience;
        Self {
            call_timeout: Duration::from_millis(settings.collaborators.transcription.timeout_ms),
            retry: RetryPolicy {
                max_retries: r.adapter_max_retries.min(1),
                initial_backoff: Duration::from_millis(r.initial_backoff_ms),
                max_backoff: Duration::from_millis(r.max_backoff_ms),
                retry_on_timeout: false,
            },
        }
    }
}

pub struct TranscriptionAdapter {
    backend: Arc<dyn SttBackend>,
    breaker: Arc<CircuitBreaker>,
    cache: TranscriptionCache,
    config: TranscriptionConfig,
}

impl TranscriptionAdapter {
    pub fn new(
        backend: Arc<dyn SttBackend>,
        breaker: Arc<CircuitBreaker>,
        cache: TranscriptionCache,
        config: TranscriptionConfig,
    ) -> Self {
        let mut config = config;
        config.retry.max_retries = config.retry.max_retries.min(1);
        Self {
            backend,
            breaker,
            cache,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &TranscriptionCache {
        &self.cache
    }

    /// Transcribe `audio`, never failing
    ///
    /// A fallback result has zero confidence and is flagged as such.
    pub async fn transcribe(
        &self,
        query_id: Uuid,
        audio: &AudioClip,
        language: &str,
        deadline: Instant,
    ) -> TranscriptionResult {
        let call = ResilientCall::new(
            &self.breaker,
            &self.config.retry,
            self.config.call_timeout,
            deadline,
        );

        match call.run(|| self.backend.transcribe(audio, language)).await {
            Ok(output) => {
                if !output.text.is_empty() {
                    self.cache.insert(audio.signature(), &output.text);
                }
                tracing::debug!(
                    %query_id,
                    backend = %self.backend.name(),
                    confidence = output.confidence,
                    "Transcription complete"
                );
                TranscriptionResult::live(query_id, output.text, output.confidence)
            }
            Err(err) => {
                let reason = match &err {
                    CallError::Failed { error, attempts } => {
                        format!("{} (after {} attempt(s))", error, attempts)
                    }
                    other => other.to_string(),
                };
                let cached = self.cache.get(audio.signature());
                tracing::warn!(
                    %query_id,
                    stage = %Stage::Transcription,
                    reason = %reason,
                    cache_hit = cached.is_some(),
                    "Transcription degraded to fallback"
                );
                self.fallback(query_id, cached)
            }
        }
    }

    /// Fallback result without calling the backend
    pub fn fallback_for(&self, query_id: Uuid, audio: &AudioClip) -> TranscriptionResult {
        self.fallback(query_id, self.cache.get(audio.signature()))
    }

    fn fallback(&self, query_id: Uuid, cached: Option<String>) -> TranscriptionResult {
        TranscriptionResult::fallback(query_id, cached.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use property_qa_core::{BreakerConfig, EngineSource};

    use crate::stt::{SttError, SttOutput};

    struct FlakyStt {
        fail: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SttBackend for FlakyStt {
        async fn transcribe(&self, _: &AudioClip, _: &str) -> Result<SttOutput, SttError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(SttError::Network("connection refused".into()))
            } else {
                Ok(SttOutput {
                    text: "3-bedroom villas in Dubai".into(),
                    confidence: 0.95,
                })
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn adapter(backend: Arc<FlakyStt>) -> TranscriptionAdapter {
        TranscriptionAdapter::new(
            backend,
            Arc::new(CircuitBreaker::new("transcription", BreakerConfig::default())),
            TranscriptionCache::new(16, Duration::from_secs(60)),
            TranscriptionConfig {
                call_timeout: Duration::from_millis(200),
                retry: RetryPolicy {
                    max_retries: 3,
                    initial_backoff: Duration::from_millis(10),
                    max_backoff: Duration::from_millis(50),
                    retry_on_timeout: false,
                },
            },
        )
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_result_is_cached() {
        let backend = Arc::new(FlakyStt {
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        let adapter = adapter(backend);
        let clip = AudioClip::new(vec![1, 2, 3, 4]);

        let result = adapter.transcribe(Uuid::new_v4(), &clip, "en", deadline()).await;
        assert_eq!(result.engine_source(), EngineSource::Live);
        assert_eq!(
            adapter.cache().get(clip.signature()).as_deref(),
            Some("3-bedroom villas in Dubai")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_falls_back_to_cached_text() {
        let backend = Arc::new(FlakyStt {
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        let adapter = adapter(backend.clone());
        let clip = AudioClip::new(vec![9; 16]);
        adapter.transcribe(Uuid::new_v4(), &clip, "en", deadline()).await;

        backend.fail.store(true, Ordering::SeqCst);
        backend.calls.store(0, Ordering::SeqCst);
        let result = adapter.transcribe(Uuid::new_v4(), &clip, "en", deadline()).await;

        assert!(result.is_fallback());
        assert_eq!(result.confidence(), 0.0);
        assert_eq!(result.text(), "3-bedroom villas in Dubai");
        // one retry at most
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_cache_gives_empty_text() {
        let backend = Arc::new(FlakyStt {
            fail: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        });
        let adapter = adapter(backend);
        let result = adapter
            .transcribe(Uuid::new_v4(), &AudioClip::new(vec![5; 8]), "en", deadline())
            .await;
        assert!(result.is_fallback());
        assert_eq!(result.text(), "");
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = TranscriptionCache::new(2, Duration::from_secs(60));
        for i in 0..50 {
            cache.insert(&format!("sig-{}", i), "text");
        }
        assert!(cache.entry_count() <= 2);
    }
}
