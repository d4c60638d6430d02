//! Templated narrative used when live generation is unavailable

use property_qa_core::LlmPrompt;

pub const NO_MATCHES_NARRATIVE: &str =
    "No matching properties were found for your query. Try widening the location or budget.";

/// Narrative built only from the prompt's context snippets
///
/// One line per snippet, in rank order, so every listed title appears
/// verbatim. Never empty.
pub fn fallback_narrative(prompt: &LlmPrompt) -> String {
    let snippets = &prompt.context_snippets;
    if snippets.is_empty() {
        return NO_MATCHES_NARRATIVE.to_string();
    }

    let mut out = if snippets.len() == 1 {
        "Here is 1 property that matches your search:".to_string()
    } else {
        format!("Here are {} properties that match your search:", snippets.len())
    };
    for (i, snippet) in snippets.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, snippet.text));
    }
    out
}
