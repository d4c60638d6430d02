//! Vector search collaborator
//!
//! The wire contract:
//! - `POST {url}/search`     `{query, limit}`       -> `[{property_id, similarity}]`
//! - `POST {url}/similarity` `{property_id, limit}` -> `[{property_id, similarity}]` (seed excluded)
//! - `POST {url}/embed`      `{property_id, text}`  -> `{property_id, embedding_id, vector_size}`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use property_qa_core::{EmbeddingVector, PropertyDetails, PropertyId, ScoredProperty};

use crate::embeddings::SimpleEmbedder;
use crate::{status_error, RagError};

/// Acknowledgement of a stored embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAck {
    pub property_id: PropertyId,
    #[serde(default)]
    pub embedding_id: Option<u64>,
    pub vector_size: usize,
}

/// Vector search collaborator
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Properties most similar to free text
    async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<ScoredProperty>, RagError>;

    /// Properties most similar to a stored property, excluding that property
    async fn similarity(
        &self,
        property_id: PropertyId,
        limit: usize,
    ) -> Result<Vec<ScoredProperty>, RagError>;

    /// Store (or replace) the embedding of a property
    async fn embed(&self, property_id: PropertyId, text: &str) -> Result<EmbedAck, RagError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct SimilarityRequest {
    property_id: PropertyId,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    property_id: PropertyId,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    property_id: PropertyId,
    #[serde(alias = "similarity")]
    score: f32,
}

impl From<SearchHit> for ScoredProperty {
    fn from(hit: SearchHit) -> Self {
        ScoredProperty::new(hit.property_id, hit.score)
    }
}

/// HTTP client for a remote vector search service
pub struct HttpVectorSearch {
    client: Client,
    base_url: String,
}

impl HttpVectorSearch {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_hits<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<ScoredProperty>, RagError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let hits: Vec<SearchHit> = response.json().await?;
        Ok(hits.into_iter().map(ScoredProperty::from).collect())
    }
}

#[async_trait]
impl VectorSearch for HttpVectorSearch {
    async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<ScoredProperty>, RagError> {
        self.post_hits(
            "search",
            &SearchRequest {
                query: query_text,
                limit,
            },
        )
        .await
    }

    async fn similarity(
        &self,
        property_id: PropertyId,
        limit: usize,
    ) -> Result<Vec<ScoredProperty>, RagError> {
        self.post_hits("similarity", &SimilarityRequest { property_id, limit })
            .await
    }

    async fn embed(&self, property_id: PropertyId, text: &str) -> Result<EmbedAck, RagError> {
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { property_id, text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        "http_vector_search"
    }
}

/// In-process vector index over hash embeddings
#[derive(Default)]
pub struct InMemoryVectorSearch {
    embedder: SimpleEmbedder,
    vectors: RwLock<BTreeMap<PropertyId, EmbeddingVector>>,
}

impl InMemoryVectorSearch {
    pub fn new(embedder: SimpleEmbedder) -> Self {
        Self {
            embedder,
            vectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index every listing using its embedding text
    pub fn with_properties<'a>(properties: impl IntoIterator<Item = &'a PropertyDetails>) -> Self {
        let index = Self::default();
        for details in properties {
            index.insert(details.id, &details.embedding_text());
        }
        index
    }

    fn insert(&self, property_id: PropertyId, text: &str) -> usize {
        let vector = self.embedder.embed(text);
        let size = vector.len();
        self.vectors
            .write()
            .insert(property_id, EmbeddingVector::new(property_id, vector));
        size
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    fn top_hits(
        &self,
        query: &[f32],
        limit: usize,
        exclude: Option<PropertyId>,
    ) -> Vec<ScoredProperty> {
        let vectors = self.vectors.read();
        let mut hits: Vec<ScoredProperty> = vectors
            .values()
            .filter(|e| Some(e.property_id) != exclude)
            .map(|e| ScoredProperty::new(e.property_id, e.cosine_similarity(query).max(0.0)))
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.property_id.cmp(&b.property_id))
        });
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl VectorSearch for InMemoryVectorSearch {
    async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<ScoredProperty>, RagError> {
        let query = self.embedder.embed(query_text);
        Ok(self.top_hits(&query, limit, None))
    }

    async fn similarity(
        &self,
        property_id: PropertyId,
        limit: usize,
    ) -> Result<Vec<ScoredProperty>, RagError> {
        let seed = self
            .vectors
            .read()
            .get(&property_id)
            .map(|e| e.vector.clone())
            .ok_or_else(|| RagError::NotFound(format!("no embedding for property {}", property_id)))?;
        Ok(self.top_hits(&seed, limit, Some(property_id)))
    }

    async fn embed(&self, property_id: PropertyId, text: &str) -> Result<EmbedAck, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding(format!(
                "empty embedding text for property {}",
                property_id
            )));
        }
        let vector_size = self.insert(property_id, text);
        Ok(EmbedAck {
            property_id,
            embedding_id: Some(property_id),
            vector_size,
        })
    }

    fn name(&self) -> &str {
        "in_memory_vector_search"
    }
}
