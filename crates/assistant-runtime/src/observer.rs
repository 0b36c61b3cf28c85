use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    InputGuardrails,
    Routing,
    Extraction,
    Query,
    Synthesis,
    Conversation,
    Memory,
    MediaPresign,
    ImageValidation,
    ImageCaption,
    Embedding,
    VectorSearch,
}

impl PipelineStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputGuardrails => "input_guardrails",
            Self::Routing => "routing",
            Self::Extraction => "extraction",
            Self::Query => "query",
            Self::Synthesis => "synthesis",
            Self::Conversation => "conversation",
            Self::Memory => "memory",
            Self::MediaPresign => "media_presign",
            Self::ImageValidation => "image_validation",
            Self::ImageCaption => "image_caption",
            Self::Embedding => "embedding",
            Self::VectorSearch => "vector_search",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure,
}

impl StageOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Receives stage boundaries in the order they happen. Observers must not block.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _requester_id: &str, _stage: PipelineStage) {}

    fn stage_finished(
        &self,
        _requester_id: &str,
        _stage: PipelineStage,
        _outcome: StageOutcome,
        _elapsed: Duration,
    ) {
    }
}

/// Logs every stage as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn stage_started(&self, requester_id: &str, stage: PipelineStage) {
        debug!(requester_id, stage = stage.as_str(), "pipeline stage started");
    }

    fn stage_finished(
        &self,
        requester_id: &str,
        stage: PipelineStage,
        outcome: StageOutcome,
        elapsed: Duration,
    ) {
        let latency_ms = elapsed.as_millis() as u64;
        match outcome {
            StageOutcome::Success => info!(
                requester_id,
                stage = stage.as_str(),
                outcome = outcome.as_str(),
                latency_ms,
                "pipeline stage finished"
            ),
            StageOutcome::Failure => warn!(
                requester_id,
                stage = stage.as_str(),
                outcome = outcome.as_str(),
                latency_ms,
                "pipeline stage finished"
            ),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn PipelineObserver>>);

impl Observers {
    pub(crate) fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self(observers)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Runs one stage between `stage_started` and `stage_finished` notifications.
    pub(crate) async fn observe<T, Fut>(
        &self,
        requester_id: &str,
        stage: PipelineStage,
        work: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        for observer in &self.0 {
            observer.stage_started(requester_id, stage);
        }
        let started_at = Instant::now();
        let result = work.await;
        let outcome = if result.is_ok() {
            StageOutcome::Success
        } else {
            StageOutcome::Failure
        };
        let elapsed = started_at.elapsed();
        for observer in &self.0 {
            observer.stage_finished(requester_id, stage, outcome, elapsed);
        }
        result
    }
}
