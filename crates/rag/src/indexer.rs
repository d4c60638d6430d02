//! Property indexing: property store row to vector search embedding

use std::sync::Arc;

use property_qa_core::PropertyId;

use crate::property_store::PropertyStore;
use crate::vector_search::{EmbedAck, VectorSearch};
use crate::RagError;

/// Embeds stored listings into the vector search collaborator
pub struct PropertyIndexer {
    store: Arc<dyn PropertyStore>,
    search: Arc<dyn VectorSearch>,
}

impl PropertyIndexer {
    pub fn new(store: Arc<dyn PropertyStore>, search: Arc<dyn VectorSearch>) -> Self {
        Self { store, search }
    }

    /// Fetch one listing and (re)embed it
    pub async fn index(&self, property_id: PropertyId) -> Result<EmbedAck, RagError> {
        let details = self.store.get_property(property_id).await?;
        let ack = self
            .search
            .embed(property_id, &details.embedding_text())
            .await?;
        tracing::info!(
            property_id,
            vector_size = ack.vector_size,
            "Indexed property"
        );
        Ok(ack)
    }

    /// Index several listings, continuing past failures
    pub async fn index_all(
        &self,
        property_ids: &[PropertyId],
    ) -> Vec<(PropertyId, Result<EmbedAck, RagError>)> {
        let mut results = Vec::with_capacity(property_ids.len());
        for &id in property_ids {
            let result = self.index(id).await;
            if let Err(e) = &result {
                tracing::warn!(property_id = id, error = %e, "Failed to index property");
            }
            results.push((id, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryPropertyStore, InMemoryVectorSearch};
    use property_qa_core::PropertyDetails;

    fn listing(id: PropertyId, title: &str, description: &str) -> PropertyDetails {
        PropertyDetails {
            id,
            title: title.to_string(),
            price: 2_000_000.0,
            currency: "AED".to_string(),
            bedrooms: 3,
            bathrooms: 2,
            area: 2000.0,
            property_type: "villa".to_string(),
            location: "Dubai".to_string(),
            description: description.to_string(),
            amenities: vec![],
            url: None,
        }
    }

    #[tokio::test]
    async fn test_index_makes_listing_searchable() {
        let store = Arc::new(InMemoryPropertyStore::new(vec![
            listing(1, "Garden Villa", "quiet garden and swimming pool"),
            listing(2, "City Loft", "walk to the metro"),
        ]));
        let search = Arc::new(InMemoryVectorSearch::default());
        let indexer = PropertyIndexer::new(store, search.clone());

        let results = indexer.index_all(&[1, 2, 99]).await;
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(matches!(results[2].1, Err(RagError::NotFound(_))));
        assert_eq!(search.len(), 2);

        let hits = search.search("swimming pool", 1).await.unwrap();
        assert_eq!(hits[0].property_id, 1);
    }
}
