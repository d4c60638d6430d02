//! Property store collaborator
//!
//! `GET {url}/properties/{id}` returns one scraped listing. The store is
//! populated by the scraper out of band and is read-only here.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::time::Instant;

use property_qa_core::{
    CallError, CircuitBreaker, PropertyDetails, PropertyId, ResilientCall, RetryPolicy,
};

use crate::{status_error, RagError};

/// Property store collaborator
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn get_property(&self, id: PropertyId) -> Result<PropertyDetails, RagError>;

    fn name(&self) -> &str;
}

/// HTTP client for the scraped listing store
pub struct HttpPropertyStore {
    client: Client,
    base_url: String,
}

impl HttpPropertyStore {
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
}

#[async_trait]
impl PropertyStore for HttpPropertyStore {
    async fn get_property(&self, id: PropertyId) -> Result<PropertyDetails, RagError> {
        let response = self
            .client
            .get(format!("{}/properties/{}", self.base_url, id))
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
        "http_property_store"
    }
}

/// In-process listing store
#[derive(Default)]
pub struct InMemoryPropertyStore {
    properties: RwLock<BTreeMap<PropertyId, PropertyDetails>>,
}

impl InMemoryPropertyStore {
    pub fn new(properties: impl IntoIterator<Item = PropertyDetails>) -> Self {
        Self {
            properties: RwLock::new(properties.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Load listings from a JSON or YAML file holding a list of properties
    pub fn from_fixture(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RagError::Fixture(format!("{}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let properties: Vec<PropertyDetails> = if is_json {
            serde_json::from_str(&raw).map_err(|e| RagError::Fixture(e.to_string()))?
        } else {
            serde_yaml::from_str(&raw).map_err(|e| RagError::Fixture(e.to_string()))?
        };

        tracing::info!(
            path = %path.display(),
            count = properties.len(),
            "Loaded property fixture"
        );
        Ok(Self::new(properties))
    }

    pub fn insert(&self, details: PropertyDetails) {
        self.properties.write().insert(details.id, details);
    }

    /// All listings ordered by id
    pub fn all(&self) -> Vec<PropertyDetails> {
        self.properties.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

#[async_trait]
impl PropertyStore for InMemoryPropertyStore {
    async fn get_property(&self, id: PropertyId) -> Result<PropertyDetails, RagError> {
        self.properties
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("property {}", id)))
    }

    fn name(&self) -> &str {
        "in_memory_property_store"
    }
}

/// Result of looking up details for a set of matches
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DetailsLookup {
    pub details: BTreeMap<PropertyId, PropertyDetails>,
    /// Ids whose lookup failed, with the reason
    pub failed: BTreeMap<PropertyId, String>,
}

impl DetailsLookup {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Look up details for every id concurrently
///
/// Each lookup goes through the store's breaker with no retries. Failures are
/// collected rather than returned so the caller can render minimal snippets.
pub async fn fetch_details(
    store: &Arc<dyn PropertyStore>,
    breaker: &CircuitBreaker,
    ids: &[PropertyId],
    call_timeout: Duration,
    deadline: Instant,
) -> DetailsLookup {
    let policy = RetryPolicy::no_retry();
    let call = ResilientCall::new(breaker, &policy, call_timeout, deadline);

    let lookups = ids.iter().map(|&id| {
        let store = store.clone();
        async move {
            let result = call.run(|| store.get_property(id)).await;
            (id, result)
        }
    });

    let mut lookup = DetailsLookup::default();
    for (id, result) in join_all(lookups).await {
        match result {
            Ok(details) => {
                lookup.details.insert(id, details);
            }
            Err(err) => {
                let reason = match err {
                    CallError::Failed { error, .. } => error.to_string(),
                    other => other.to_string(),
                };
                lookup.failed.insert(id, reason);
            }
        }
    }
    lookup
}
