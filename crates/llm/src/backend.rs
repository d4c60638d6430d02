//! Generation backends
//!
//! The HTTP backend talks to the generation service:
//! `POST {url}/process-query` with `{query, context, prompt, temperature, max_tokens}`,
//! answered by `{response, tokens_used, model}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use property_qa_core::LlmPrompt;

use crate::LlmError;

/// Raw output of a backend call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub tokens_used: u32,
}

/// Generation backend trait
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &LlmPrompt) -> Result<GenerationOutput, LlmError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    query: &'a str,
    context: Vec<String>,
    prompt: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(alias = "response")]
    text: String,
    #[serde(default)]
    tokens_used: u32,
}

/// HTTP generation backend
pub struct HttpGenerationBackend {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpGenerationBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: "remote".to_string(),
        })
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Classify a non-success status
fn status_error(status: StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        422 | 451 => LlmError::ContentPolicy(body),
        429 => LlmError::Network(format!("rate limited: {}", body)),
        s if s >= 500 => LlmError::Network(format!("{}: {}", status, body)),
        _ => LlmError::Api(format!("{}: {}", status, body)),
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(&self, prompt: &LlmPrompt) -> Result<GenerationOutput, LlmError> {
        let request = GenerateRequest {
            query: &prompt.query_text,
            context: prompt.context_lines(),
            prompt: prompt.render(),
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/process-query", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body: GenerateResponse = response.json().await?;
        if body.text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("empty generation".to_string()));
        }

        Ok(GenerationOutput {
            text: body.text,
            tokens_used: body.tokens_used,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
