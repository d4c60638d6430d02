//! Speech-to-text collaborator
//!
//! `POST {url}/transcribe` with the raw audio bytes as body and the language
//! in the `X-Language` header, answered by `{transcription, confidence}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use property_qa_core::{AudioClip, RetryableError};

/// STT errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SttError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("STT service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RetryableError for SttError {
    fn is_retryable(&self) -> bool {
        match self {
            SttError::Network(_) => true,
            SttError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            SttError::Api { status, .. } => *status >= 500 || *status == 429,
            SttError::Configuration(_) => false,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for SttError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SttError::Timeout
        } else if err.is_decode() {
            SttError::InvalidResponse(err.to_string())
        } else {
            SttError::Network(err.to_string())
        }
    }
}

/// Transcript as returned by the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct SttOutput {
    pub text: String,
    pub confidence: f32,
}

/// Speech-to-text backend
#[async_trait]
pub trait SttBackend: Send + Sync {
    async fn transcribe(&self, audio: &AudioClip, language: &str) -> Result<SttOutput, SttError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    #[serde(alias = "transcription")]
    text: String,
    #[serde(default)]
    confidence: f32,
}

/// HTTP STT backend
pub struct HttpSttBackend {
    client: Client,
    url: String,
}

impl HttpSttBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SttError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SttError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SttBackend for HttpSttBackend {
    async fn transcribe(&self, audio: &AudioClip, language: &str) -> Result<SttOutput, SttError> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.url))
            .header("Content-Type", "application/octet-stream")
            .header("X-Language", language)
            .body(audio.data().to_vec())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(SttError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: SttResponse = response.json().await?;
        Ok(SttOutput {
            text: body.text.trim().to_string(),
            confidence: body.confidence,
        })
    }

    fn name(&self) -> &str {
        "http_stt"
    }
}
