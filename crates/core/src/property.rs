//! Property listing types and match ranking

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PropertyId = u64;

/// Unranked search hit as returned by a vector search backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredProperty {
    pub property_id: PropertyId,
    pub score: f32,
}

impl ScoredProperty {
    pub fn new(property_id: PropertyId, score: f32) -> Self {
        Self { property_id, score }
    }
}

/// Ranked retrieval result
///
/// `rank` is 1-based and dense. Scores are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyMatch {
    pub property_id: PropertyId,
    pub score: f32,
    pub rank: u32,
}

/// Rank raw hits into at most `limit` matches
///
/// Non-finite scores are dropped, scores are clamped to `[0, 1]` and
/// duplicate ids keep their best score. Ordering is score descending with
/// ties broken by ascending id, so equal inputs always rank identically.
pub fn rank_matches<I>(candidates: I, limit: usize) -> Vec<PropertyMatch>
where
    I: IntoIterator<Item = ScoredProperty>,
{
    let mut best: HashMap<PropertyId, f32> = HashMap::new();
    for candidate in candidates {
        if !candidate.score.is_finite() {
            continue;
        }
        let score = candidate.score.clamp(0.0, 1.0);
        best.entry(candidate.property_id)
            .and_modify(|s| {
                if score > *s {
                    *s = score;
                }
            })
            .or_insert(score);
    }

    let mut ranked: Vec<(PropertyId, f32)> = best.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, (property_id, score))| PropertyMatch {
            property_id,
            score,
            rank: i as u32 + 1,
        })
        .collect()
}

/// Listing details used to build prompt context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub id: PropertyId,
    pub title: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: u32,
    /// Floor area in square feet
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub property_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

fn default_currency() -> String {
    "AED".to_string()
}

impl PropertyDetails {
    /// Text used to embed a listing for vector search
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title, self.description, self.location, self.property_type
        )
    }

    /// First `n` amenities
    pub fn key_amenities(&self, n: usize) -> &[String] {
        &self.amenities[..self.amenities.len().min(n)]
    }
}

/// Stored embedding for a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub property_id: PropertyId,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingVector {
    pub fn new(property_id: PropertyId, vector: Vec<f32>) -> Self {
        Self {
            property_id,
            vector,
            created_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Cosine similarity, 0.0 on dimension mismatch or zero vectors
    pub fn cosine_similarity(&self, other: &[f32]) -> f32 {
        if self.vector.len() != other.len() {
            return 0.0;
        }
        let dot: f32 = self.vector.iter().zip(other).map(|(a, b)| a * b).sum();
        let na: f32 = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = other.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        dot / (na * nb)
    }
}
