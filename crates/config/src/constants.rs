//! Centralized defaults
//!
//! Single source of truth for the default values used by `Settings` and by
//! crate-local configs that are constructed without a settings file.

/// Collaborator endpoints (local development ports)
pub mod endpoints {
    /// Property store (scraped listings)
    pub const PROPERTY_STORE_DEFAULT: &str = "http://localhost:8001";

    /// Speech-to-text service
    pub const TRANSCRIPTION_DEFAULT: &str = "http://localhost:8002";

    /// Vector search service
    pub const VECTOR_SEARCH_DEFAULT: &str = "http://localhost:8003";

    /// Generation service
    pub const GENERATION_DEFAULT: &str = "http://localhost:8004";
}

/// Per-call timeouts (ms)
pub mod timeouts {
    pub const TRANSCRIPTION_CALL_MS: u64 = 8_000;
    pub const VECTOR_SEARCH_CALL_MS: u64 = 2_000;
    pub const SIMILARITY_CALL_MS: u64 = 1_500;
    pub const PROPERTY_STORE_CALL_MS: u64 = 1_000;
    pub const GENERATION_CALL_MS: u64 = 15_000;
}

/// Per-stage budgets (ms). The overall request deadline is their sum.
pub mod budgets {
    pub const TRANSCRIPTION_MS: u64 = 10_000;
    pub const RETRIEVAL_MS: u64 = 5_000;
    pub const CONTEXT_ASSEMBLY_MS: u64 = 1_500;
    pub const GENERATION_MS: u64 = 20_000;
}

/// Admission control
pub mod admission {
    pub const MAX_CONCURRENCY: usize = 32;
    pub const ADMISSION_TIMEOUT_MS: u64 = 250;
}

/// Circuit breaker and retry defaults
pub mod resilience {
    pub const FAILURE_THRESHOLD: u32 = 5;
    pub const COOLDOWN_MS: u64 = 30_000;
    pub const HALF_OPEN_MAX_CALLS: u32 = 1;

    /// Retrieval is the only fatal path and gets a configurable retry count
    pub const RETRIEVAL_MAX_RETRIES: u32 = 2;

    /// Transcription and generation are capped at one retry
    pub const ADAPTER_MAX_RETRIES: u32 = 1;

    pub const INITIAL_BACKOFF_MS: u64 = 100;
    pub const MAX_BACKOFF_MS: u64 = 2_000;
}

/// Retrieval defaults
pub mod retrieval {
    pub const DEFAULT_TOP_K: usize = 5;
    pub const MAX_TOP_K: usize = 50;
    pub const SIMILAR_LIMIT: usize = 3;
}

/// Prompt/context defaults
pub mod context {
    pub const TOKEN_BUDGET: usize = 1_024;
    pub const KEY_AMENITIES: usize = 3;
    pub const TEMPERATURE: f32 = 0.7;
    pub const MAX_TOKENS: u32 = 500;
}

/// Last-good transcription cache
pub mod cache {
    pub const TRANSCRIPTION_CAPACITY: u64 = 1_024;
    pub const TRANSCRIPTION_TTL_SECS: u64 = 600;
}

/// HTTP server defaults
pub mod server {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 8005;
}
