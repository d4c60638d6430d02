//! Hash based text embedding
//!
//! No model required. Words are hashed into a fixed number of buckets and
//! the bag-of-words vector is L2 normalized, so texts that share vocabulary
//! land close together under cosine similarity.

use unicode_segmentation::UnicodeSegmentation;

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Embedding dimension
    pub embedding_dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { embedding_dim: 384 }
    }
}

/// Deterministic bag-of-words embedder
#[derive(Debug, Clone, Default)]
pub struct SimpleEmbedder {
    config: EmbeddingConfig,
}

impl SimpleEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    pub fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let dim = self.config.embedding_dim.max(1);
        let mut embedding = vec![0.0f32; dim];

        for word in text.unicode_words() {
            let word = word.to_lowercase();
            embedding[bucket(&word, dim)] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

// FNV-1a, stable across runs and platforms
fn bucket(word: &str, dim: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dim as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embedding_is_normalized() {
        let e = SimpleEmbedder::default().embed("villa with pool in Dubai");
        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = SimpleEmbedder::default().embed("  ");
        assert!(e.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = SimpleEmbedder::default();
        let query = embedder.embed("villa with swimming pool");
        let close = embedder.embed("Family villa with a private swimming pool");
        let far = embedder.embed("Studio apartment near the metro");
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_case_insensitive() {
        let embedder = SimpleEmbedder::default();
        assert_eq!(embedder.embed("Dubai Marina"), embedder.embed("dubai marina"));
    }
}
