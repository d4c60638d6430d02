//! Configuration management for the property Q&A service
//!
//! Supports loading configuration from:
//! - `config/default.yaml`
//! - `config/{env}.yaml` for the selected environment
//! - Environment variables (`PROPERTY_QA__` prefix, `__` separator)
//!
//! Values missing everywhere fall back to the defaults in [`constants`].

pub mod constants;
pub mod pipeline;
pub mod settings;

pub use pipeline::PipelineConfig;
pub use settings::{
    load_settings, load_settings_from, CollaboratorMode, CollaboratorsConfig, ContextConfig,
    EndpointConfig, ObservabilityConfig, PartialFitPolicy, ResilienceConfig, RetrievalConfig,
    RuntimeEnvironment, ServerConfig, Settings, TranscriptionCacheConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
