//! Per-request state machine

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use property_qa_core::{Degradation, Stage};

/// Lifecycle of one request through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Normalizing,
    Transcribing,
    Retrieving,
    AssemblingContext,
    Generating,
    AssemblingResponse,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is allowed
    ///
    /// Only normalization and primary retrieval can fail a request.
    /// Cancellation is reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Received, Normalizing)
                | (Normalizing, Transcribing)
                | (Normalizing, Retrieving)
                | (Normalizing, Failed)
                | (Transcribing, Retrieving)
                | (Retrieving, AssemblingContext)
                | (Retrieving, Failed)
                | (AssemblingContext, Generating)
                | (Generating, AssemblingResponse)
                | (AssemblingResponse, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Normalizing => "normalizing",
            Self::Transcribing => "transcribing",
            Self::Retrieving => "retrieving",
            Self::AssemblingContext => "assembling_context",
            Self::Generating => "generating",
            Self::AssemblingResponse => "assembling_response",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one request: state, stage timings and degradations
#[derive(Debug)]
pub struct RequestRun {
    query_id: Uuid,
    state: PipelineState,
    started: Instant,
    stage_started: Instant,
    timings: BTreeMap<Stage, u64>,
    degradations: Vec<Degradation>,
}

impl RequestRun {
    pub fn new(query_id: Uuid) -> Self {
        let now = Instant::now();
        Self {
            query_id,
            state: PipelineState::Received,
            started: now,
            stage_started: now,
            timings: BTreeMap::new(),
            degradations: Vec::new(),
        }
    }

    /// Attach the id assigned during normalization
    pub fn bind_query(&mut self, query_id: Uuid) {
        self.query_id = query_id;
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`, ignoring transitions the state machine does not allow
    pub fn transition(&mut self, next: PipelineState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                query_id = %self.query_id,
                from = %self.state,
                to = %next,
                "Rejected pipeline state transition"
            );
            return false;
        }
        let now = Instant::now();
        tracing::debug!(
            query_id = %self.query_id,
            from = %self.state,
            to = %next,
            elapsed_ms = now.duration_since(self.stage_started).as_millis() as u64,
            "Pipeline state transition"
        );
        self.state = next;
        self.stage_started = now;
        true
    }

    /// Start timing a stage
    pub fn stage_timer(&self) -> Instant {
        Instant::now()
    }

    /// Record time spent in `stage` since `since`, accumulating repeats
    pub fn record_timing(&mut self, stage: Stage, since: Instant) {
        let ms = since.elapsed().as_millis() as u64;
        *self.timings.entry(stage).or_insert(0) += ms;
    }

    pub fn set_timing(&mut self, stage: Stage, ms: u64) {
        self.timings.insert(stage, ms);
    }

    pub fn degrade(&mut self, stage: Stage, reason: impl Into<String>) {
        let degradation = Degradation::new(stage, reason);
        tracing::warn!(
            query_id = %self.query_id,
            stage = %degradation.stage,
            reason = %degradation.reason,
            "Stage degraded"
        );
        self.degradations.push(degradation);
    }

    pub fn extend_degradations(&mut self, degradations: impl IntoIterator<Item = Degradation>) {
        for d in degradations {
            self.degrade(d.stage, d.reason);
        }
    }

    pub fn timings(&self) -> &BTreeMap<Stage, u64> {
        &self.timings
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
