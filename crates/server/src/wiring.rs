//! Collaborator construction from settings

use std::sync::Arc;
use std::time::Duration;

use property_qa_config::{CollaboratorMode, Settings};
use property_qa_llm::HttpGenerationBackend;
use property_qa_pipeline::{Collaborators, HttpSttBackend};
use property_qa_rag::{
    HttpPropertyStore, HttpVectorSearch, InMemoryPropertyStore, InMemoryVectorSearch,
    PropertyStore, VectorSearch,
};

use crate::ServerError;

/// Build the collaborator set for the configured mode
///
/// `in_memory` replaces the vector search and property store with
/// fixture-backed in-process versions. Transcription and generation always
/// go over HTTP and fall back to their templates when unreachable.
pub fn build_collaborators(settings: &Settings) -> Result<Collaborators, ServerError> {
    let c = &settings.collaborators;
    let timeout = |ms: u64| Duration::from_millis(ms);

    let stt = HttpSttBackend::new(&c.transcription.url, timeout(c.transcription.timeout_ms))
        .map_err(|e| ServerError::Collaborator(e.to_string()))?;
    let generation =
        HttpGenerationBackend::new(&c.generation.url, timeout(c.generation.timeout_ms))
            .map_err(|e| ServerError::Collaborator(e.to_string()))?;

    let (vector_search, property_store): (Arc<dyn VectorSearch>, Arc<dyn PropertyStore>) = match c.mode {
        CollaboratorMode::Http => {
            let search =
                HttpVectorSearch::new(&c.vector_search.url, timeout(c.vector_search.timeout_ms))
                    .map_err(|e| ServerError::Collaborator(e.to_string()))?;
            let store = HttpPropertyStore::new(
                &c.property_store.url,
                timeout(c.property_store.timeout_ms),
            )
            .map_err(|e| ServerError::Collaborator(e.to_string()))?;
            (
                Arc::new(search) as Arc<dyn VectorSearch>,
                Arc::new(store) as Arc<dyn PropertyStore>,
            )
        }
        CollaboratorMode::InMemory => {
            let store = match &c.fixture_path {
                Some(path) => InMemoryPropertyStore::from_fixture(path)
                    .map_err(|e| ServerError::Config(e.to_string()))?,
                None => InMemoryPropertyStore::default(),
            };
            let listings = store.all();
            let search = InMemoryVectorSearch::with_properties(listings.iter());
            tracing::info!(
                listings = listings.len(),
                fixture = ?c.fixture_path,
                "Using in-memory vector search and property store"
            );
            (
                Arc::new(search) as Arc<dyn VectorSearch>,
                Arc::new(store) as Arc<dyn PropertyStore>,
            )
        }
    };

    Ok(Collaborators {
        stt: Arc::new(stt),
        vector_search,
        property_store,
        generation: Arc::new(generation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_mode_without_fixture() {
        let mut settings = Settings::default();
        settings.collaborators.mode = CollaboratorMode::InMemory;
        settings.collaborators.fixture_path = None;
        assert!(build_collaborators(&settings).is_ok());
    }

    #[test]
    fn test_missing_fixture_is_a_config_error() {
        let mut settings = Settings::default();
        settings.collaborators.mode = CollaboratorMode::InMemory;
        settings.collaborators.fixture_path = Some("does/not/exist.yaml".to_string());
        assert!(matches!(
            build_collaborators(&settings),
            Err(ServerError::Config(_))
        ));
    }
}
