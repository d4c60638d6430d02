//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use property_qa_config::Settings;
use property_qa_pipeline::PipelineOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Absent when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Settings, orchestrator: PipelineOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
