//! Prompt and generation types

use serde::{Deserialize, Serialize};

use crate::property::PropertyId;
use crate::tokens::estimate_tokens;
use crate::transcript::EngineSource;

const SYSTEM_PREAMBLE: &str = "You are a real estate assistant. Answer the question using only the properties listed below. \
If none of them fit, say so.";

/// One property rendered for the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub property_id: PropertyId,
    /// Rank of the originating match
    pub rank: u32,
    pub title: String,
    pub text: String,
}

/// Prompt handed to the generation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmPrompt {
    pub query_text: String,
    /// Ordered by match rank
    pub context_snippets: Vec<ContextSnippet>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmPrompt {
    pub fn new(query_text: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            query_text: query_text.into(),
            context_snippets: Vec::new(),
            temperature,
            max_tokens,
        }
    }

    /// Serialized prompt text
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            SYSTEM_PREAMBLE.len()
                + self.query_text.len()
                + self.context_snippets.iter().map(|s| s.text.len() + 8).sum::<usize>()
                + 32,
        );
        out.push_str(SYSTEM_PREAMBLE);
        out.push_str("\n\nQuestion: ");
        out.push_str(&self.query_text);
        out.push_str("\n\nProperties:");
        for (i, snippet) in self.context_snippets.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, snippet.text));
        }
        out
    }

    /// Estimated size of [`render`](Self::render) in tokens
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }

    /// Context lines as sent to collaborators that take structured context
    pub fn context_lines(&self) -> Vec<String> {
        self.context_snippets.iter().map(|s| s.text.clone()).collect()
    }
}

/// Generated narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub source: EngineSource,
}

impl LlmResponse {
    pub fn is_fallback(&self) -> bool {
        self.source == EngineSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(id: PropertyId, rank: u32, text: &str) -> ContextSnippet {
        ContextSnippet {
            property_id: id,
            rank,
            title: format!("Listing {id}"),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_render_orders_snippets() {
        let mut prompt = LlmPrompt::new("2BR in Marina", 0.7, 500);
        prompt.context_snippets.push(snippet(7, 1, "first"));
        prompt.context_snippets.push(snippet(3, 2, "second"));
        let rendered = prompt.render();
        assert!(rendered.contains("Question: 2BR in Marina"));
        let first = rendered.find("1. first").unwrap();
        let second = rendered.find("2. second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_estimated_tokens_grows_with_context() {
        let mut prompt = LlmPrompt::new("q", 0.7, 500);
        let base = prompt.estimated_tokens();
        prompt.context_snippets.push(snippet(1, 1, &"x".repeat(40)));
        assert!(prompt.estimated_tokens() >= base + 10);
    }
}
