//! Token estimation
//!
//! Grapheme based approximation, roughly four graphemes per token for
//! English text. Good enough for prompt budgeting without a tokenizer.

use unicode_segmentation::UnicodeSegmentation;

const GRAPHEMES_PER_TOKEN: usize = 4;
const ELLIPSIS: &str = "...";

/// Estimate the number of tokens in `text`
pub fn estimate_tokens(text: &str) -> usize {
    let graphemes = text.graphemes(true).count();
    graphemes.div_ceil(GRAPHEMES_PER_TOKEN)
}

/// Truncate `text` so that it fits in `max_tokens`
///
/// Truncated output ends with `...`. Text that already fits is returned as is.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let max_graphemes = max_tokens * GRAPHEMES_PER_TOKEN;
    if max_graphemes <= ELLIPSIS.len() {
        return text.graphemes(true).take(max_graphemes).collect();
    }
    let mut out: String = text
        .graphemes(true)
        .take(max_graphemes - ELLIPSIS.len())
        .collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_truncate_fits_budget() {
        let text = "a".repeat(100);
        let out = truncate_to_tokens(&text, 5);
        assert!(estimate_tokens(&out) <= 5);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_noop_when_short() {
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }
}
