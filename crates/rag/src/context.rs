//! Prompt context assembly
//!
//! Renders ranked matches into fixed-template snippets and packs them into an
//! [`LlmPrompt`] under a token budget. Pure and deterministic: the same
//! matches and details always give the same prompt.

use std::collections::BTreeMap;

use property_qa_config::{ContextConfig, PartialFitPolicy};
use property_qa_core::{
    truncate_to_tokens, ContextSnippet, LlmPrompt, PropertyDetails, PropertyId, PropertyMatch,
};

/// Context assembly configuration
#[derive(Debug, Clone)]
pub struct ContextAssemblerConfig {
    /// Budget for the whole rendered prompt, query included
    pub token_budget: usize,
    /// Amenities listed per snippet
    pub key_amenities: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub partial_fit: PartialFitPolicy,
}

impl Default for ContextAssemblerConfig {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextAssemblerConfig {
    fn from(config: &ContextConfig) -> Self {
        Self {
            token_budget: config.token_budget,
            key_amenities: config.key_amenities,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            partial_fit: config.partial_fit,
        }
    }
}

/// Builds generation prompts from ranked matches
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: ContextAssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextAssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextAssemblerConfig {
        &self.config
    }

    /// Build the prompt for `query_text`
    ///
    /// Snippets follow match rank. Lower-ranked snippets are dropped first
    /// when the budget runs out. A non-empty `matches` always yields at least
    /// one snippet, truncated to the remaining room if necessary.
    pub fn assemble(
        &self,
        query_text: &str,
        matches: &[PropertyMatch],
        details: &BTreeMap<PropertyId, PropertyDetails>,
    ) -> LlmPrompt {
        let mut prompt = LlmPrompt::new(query_text, self.config.temperature, self.config.max_tokens);

        let mut ordered: Vec<&PropertyMatch> = matches.iter().collect();
        ordered.sort_by_key(|m| (m.rank, m.property_id));

        let mut dropped = 0usize;
        for m in ordered {
            let snippet = self.render_snippet(m, details.get(&m.property_id));
            prompt.context_snippets.push(snippet);
            if prompt.estimated_tokens() <= self.config.token_budget {
                continue;
            }

            let Some(snippet) = prompt.context_snippets.pop() else {
                break;
            };
            if prompt.context_snippets.is_empty() {
                let base = prompt.estimated_tokens();
                // "\nN. " prefix costs about two tokens
                let room = self.config.token_budget.saturating_sub(base + 2).max(1);
                prompt.context_snippets.push(ContextSnippet {
                    text: truncate_to_tokens(&snippet.text, room),
                    ..snippet
                });
                dropped = matches.len() - 1;
                break;
            }

            dropped += 1;
            if self.config.partial_fit == PartialFitPolicy::Stop {
                dropped = matches.len() - prompt.context_snippets.len();
                break;
            }
        }

        if dropped > 0 {
            tracing::debug!(
                kept = prompt.context_snippets.len(),
                dropped,
                budget = self.config.token_budget,
                "Context truncated to token budget"
            );
        }
        prompt
    }

    /// Render one match with the fixed snippet template
    pub fn render_snippet(
        &self,
        m: &PropertyMatch,
        details: Option<&PropertyDetails>,
    ) -> ContextSnippet {
        match details {
            Some(d) => {
                let mut text = format!(
                    "{} | {} {} | {}BR, {}BA, {} sqft",
                    d.title,
                    d.currency,
                    format_thousands(d.price),
                    d.bedrooms,
                    d.bathrooms,
                    format_thousands(d.area),
                );
                if !d.property_type.is_empty() {
                    text.push(' ');
                    text.push_str(&d.property_type);
                }
                if !d.location.is_empty() {
                    text.push_str(" in ");
                    text.push_str(&d.location);
                }
                let amenities = d.key_amenities(self.config.key_amenities);
                if !amenities.is_empty() {
                    text.push_str(" | Amenities: ");
                    text.push_str(&amenities.join(", "));
                }
                ContextSnippet {
                    property_id: m.property_id,
                    rank: m.rank,
                    title: d.title.clone(),
                    text,
                }
            }
            None => {
                let title = format!("Property #{}", m.property_id);
                ContextSnippet {
                    property_id: m.property_id,
                    rank: m.rank,
                    text: format!("{} (details unavailable)", title),
                    title,
                }
            }
        }
    }
}

/// Whole number with comma separators, e.g. `1,890,000`
fn format_thousands(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }
    let rounded = value.round().abs() as u64;
    let digits = rounded.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0.0 && rounded > 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
