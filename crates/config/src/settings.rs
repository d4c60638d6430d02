//! Main settings module

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{cache, context, endpoints, resilience, retrieval, server, timeouts};
use crate::{ConfigError, PipelineConfig};

/// Prefix for environment overrides, e.g. `PROPERTY_QA__PIPELINE__MAX_CONCURRENCY`
pub const ENV_PREFIX: &str = "PROPERTY_QA";

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Stage budgets and admission control
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External collaborator endpoints
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Circuit breaker and retry policy
    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt construction
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub transcription_cache: TranscriptionCacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_pipeline()?;
        self.validate_collaborators()?;
        self.validate_resilience()?;
        self.validate_retrieval()?;
        self.validate_context()?;
        self.validate_cache()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "Port cannot be 0"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid(
                "server.max_body_bytes",
                "Body limit must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        for (field, value) in [
            ("pipeline.transcription_budget_ms", p.transcription_budget_ms),
            ("pipeline.retrieval_budget_ms", p.retrieval_budget_ms),
            ("pipeline.context_budget_ms", p.context_budget_ms),
            ("pipeline.generation_budget_ms", p.generation_budget_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "Stage budget must be greater than 0"));
            }
        }

        if p.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "pipeline.max_concurrency",
                "At least one concurrent request is required",
            ));
        }

        if p.default_top_k == 0 || p.default_top_k > p.max_top_k {
            return Err(ConfigError::invalid(
                "pipeline.default_top_k",
                format!(
                    "Must be between 1 and max_top_k ({}), got {}",
                    p.max_top_k, p.default_top_k
                ),
            ));
        }

        Ok(())
    }

    fn validate_collaborators(&self) -> Result<(), ConfigError> {
        let c = &self.collaborators;
        if self.environment.is_strict() && c.mode == CollaboratorMode::InMemory {
            return Err(ConfigError::invalid(
                "collaborators.mode",
                format!("in_memory collaborators are not allowed in {:?}", self.environment),
            ));
        }
        for (name, endpoint) in c.endpoints() {
            if endpoint.timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    &format!("collaborators.{}.timeout_ms", name),
                    "Timeout must be greater than 0",
                ));
            }
            if c.mode == CollaboratorMode::Http && endpoint.url.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &format!("collaborators.{}.url", name),
                    "URL is required in http mode",
                ));
            }
        }
        Ok(())
    }

    fn validate_resilience(&self) -> Result<(), ConfigError> {
        let r = &self.resilience;
        if r.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "resilience.failure_threshold",
                "Threshold must be greater than 0",
            ));
        }
        if r.cooldown_ms == 0 {
            return Err(ConfigError::invalid(
                "resilience.cooldown_ms",
                "Cooldown must be greater than 0",
            ));
        }
        if r.half_open_max_calls == 0 {
            return Err(ConfigError::invalid(
                "resilience.half_open_max_calls",
                "At least one half-open call is required",
            ));
        }
        if r.adapter_max_retries > 1 {
            return Err(ConfigError::invalid(
                "resilience.adapter_max_retries",
                format!("Transcription and generation allow at most 1 retry, got {}", r.adapter_max_retries),
            ));
        }
        if r.initial_backoff_ms > r.max_backoff_ms {
            return Err(ConfigError::invalid(
                "resilience.initial_backoff_ms",
                "Initial backoff cannot exceed max_backoff_ms",
            ));
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        if self.retrieval.expansion_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "retrieval.expansion_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_context(&self) -> Result<(), ConfigError> {
        let ctx = &self.context;
        if ctx.token_budget == 0 {
            return Err(ConfigError::invalid(
                "context.token_budget",
                "Token budget must be greater than 0",
            ));
        }
        if !(0.0..=2.0).contains(&ctx.temperature) {
            return Err(ConfigError::invalid(
                "context.temperature",
                format!("Must be between 0.0 and 2.0, got {}", ctx.temperature),
            ));
        }
        if ctx.max_tokens == 0 {
            return Err(ConfigError::invalid(
                "context.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_cache(&self) -> Result<(), ConfigError> {
        if self.transcription_cache.capacity == 0 {
            return Err(ConfigError::invalid(
                "transcription_cache.capacity",
                "Cache must hold at least one entry",
            ));
        }
        if self.transcription_cache.ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "transcription_cache.ttl_secs",
                "TTL must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins, empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Upper bound for uploaded audio bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    server::HOST.to_string()
}
fn default_port() -> u16 {
    server::PORT
}
fn default_true() -> bool {
    true
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Which collaborator implementations to wire up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorMode {
    /// Remote services over HTTP
    #[default]
    Http,
    /// In-process collaborators, optionally seeded from a fixture
    InMemory,
}

/// One remote collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    /// Per-call timeout
    pub timeout_ms: u64,
}

impl EndpointConfig {
    fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            timeout_ms,
        }
    }
}

/// External collaborators consumed by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default)]
    pub mode: CollaboratorMode,

    /// Property fixture (JSON or YAML) loaded in `in_memory` mode
    #[serde(default)]
    pub fixture_path: Option<String>,

    #[serde(default = "default_transcription_endpoint")]
    pub transcription: EndpointConfig,

    #[serde(default = "default_vector_search_endpoint")]
    pub vector_search: EndpointConfig,

    #[serde(default = "default_property_store_endpoint")]
    pub property_store: EndpointConfig,

    #[serde(default = "default_generation_endpoint")]
    pub generation: EndpointConfig,
}

fn default_transcription_endpoint() -> EndpointConfig {
    EndpointConfig::new(endpoints::TRANSCRIPTION_DEFAULT, timeouts::TRANSCRIPTION_CALL_MS)
}
fn default_vector_search_endpoint() -> EndpointConfig {
    EndpointConfig::new(endpoints::VECTOR_SEARCH_DEFAULT, timeouts::VECTOR_SEARCH_CALL_MS)
}
fn default_property_store_endpoint() -> EndpointConfig {
    EndpointConfig::new(endpoints::PROPERTY_STORE_DEFAULT, timeouts::PROPERTY_STORE_CALL_MS)
}
fn default_generation_endpoint() -> EndpointConfig {
    EndpointConfig::new(endpoints::GENERATION_DEFAULT, timeouts::GENERATION_CALL_MS)
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            mode: CollaboratorMode::default(),
            fixture_path: None,
            transcription: default_transcription_endpoint(),
            vector_search: default_vector_search_endpoint(),
            property_store: default_property_store_endpoint(),
            generation: default_generation_endpoint(),
        }
    }
}

impl CollaboratorsConfig {
    pub fn endpoints(&self) -> [(&'static str, &EndpointConfig); 4] {
        [
            ("transcription", &self.transcription),
            ("vector_search", &self.vector_search),
            ("property_store", &self.property_store),
            ("generation", &self.generation),
        ]
    }
}

/// Circuit breaker and retry policy, shared by all collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures before a breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker short-circuits calls
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Retries for primary retrieval
    #[serde(default = "default_retrieval_max_retries")]
    pub retrieval_max_retries: u32,

    /// Retries for transcription and generation (0 or 1)
    #[serde(default = "default_adapter_max_retries")]
    pub adapter_max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_failure_threshold() -> u32 {
    resilience::FAILURE_THRESHOLD
}
fn default_cooldown_ms() -> u64 {
    resilience::COOLDOWN_MS
}
fn default_half_open_max_calls() -> u32 {
    resilience::HALF_OPEN_MAX_CALLS
}
fn default_retrieval_max_retries() -> u32 {
    resilience::RETRIEVAL_MAX_RETRIES
}
fn default_adapter_max_retries() -> u32 {
    resilience::ADAPTER_MAX_RETRIES
}
fn default_initial_backoff_ms() -> u64 {
    resilience::INITIAL_BACKOFF_MS
}
fn default_max_backoff_ms() -> u64 {
    resilience::MAX_BACKOFF_MS
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            half_open_max_calls: default_half_open_max_calls(),
            retrieval_max_retries: default_retrieval_max_retries(),
            adapter_max_retries: default_adapter_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Similarity expansion policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Suggestions requested from the expansion call
    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,

    /// Per-call timeout for the expansion call. Expansion is skipped when
    /// less than this remains of the retrieval budget.
    #[serde(default = "default_expansion_timeout_ms")]
    pub expansion_timeout_ms: u64,

    /// Drop suggestions that already appear among the primary matches
    #[serde(default)]
    pub exclude_primary_from_similar: bool,
}

fn default_similar_limit() -> usize {
    retrieval::SIMILAR_LIMIT
}
fn default_expansion_timeout_ms() -> u64 {
    timeouts::SIMILARITY_CALL_MS
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similar_limit: default_similar_limit(),
            expansion_timeout_ms: default_expansion_timeout_ms(),
            exclude_primary_from_similar: false,
        }
    }
}

/// What to do with a snippet that does not fit the remaining token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialFitPolicy {
    /// Stop at the first snippet that does not fit
    #[default]
    Stop,
    /// Skip it and keep trying lower-ranked snippets
    Skip,
}

/// Prompt construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the whole rendered prompt
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Amenities listed per property
    #[serde(default = "default_key_amenities")]
    pub key_amenities: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Generation length cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub partial_fit: PartialFitPolicy,
}

fn default_token_budget() -> usize {
    context::TOKEN_BUDGET
}
fn default_key_amenities() -> usize {
    context::KEY_AMENITIES
}
fn default_temperature() -> f32 {
    context::TEMPERATURE
}
fn default_max_tokens() -> u32 {
    context::MAX_TOKENS
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            key_amenities: default_key_amenities(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            partial_fit: PartialFitPolicy::default(),
        }
    }
}

/// Bounded cache of last-good transcriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionCacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> u64 {
    cache::TRANSCRIPTION_CAPACITY
}
fn default_cache_ttl() -> u64 {
    cache::TRANSCRIPTION_TTL_SECS
}

impl Default for TranscriptionCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from `dir/default.yaml`, then `dir/{env}.yaml`, then the
/// environment
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(
        File::with_name(&dir.join("default").to_string_lossy()).required(false),
    );

    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&dir.join(env_name).to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
