use shared::config::ConfigError;
use shared::guardrails::{GuardrailError, GuardrailReason};
use shared::listing_store::StoreError;
use shared::llm::{LlmGatewayError, OutputValidationError};
use shared::media::ObjectStoreError;
use shared::memory::MemoryStoreError;
use shared::single_flight::SingleFlightError;
use thiserror::Error;

use crate::observer::PipelineStage;

/// Failure of one request. Cloneable so a deduplicated generation can hand the same
/// outcome to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("request blocked by {guardrail}: {reason}")]
    GuardrailBlocked {
        guardrail: &'static str,
        reason: String,
    },
    #[error("{scope} rate limit exceeded, retry after {retry_after_seconds}s")]
    QuotaOrRateExceeded {
        scope: &'static str,
        retry_after_seconds: u64,
    },
    #[error("{stage} timed out")]
    UpstreamTimeout { stage: PipelineStage },
    #[error("{stage} failed: {message}")]
    UpstreamError {
        stage: PipelineStage,
        message: String,
    },
    #[error("{stage} produced malformed output: {reason}")]
    MalformedAgentOutput {
        stage: PipelineStage,
        reason: String,
    },
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::GuardrailBlocked { .. } | Self::QuotaOrRateExceeded { .. } => {
                Some(PipelineStage::InputGuardrails)
            }
            Self::UpstreamTimeout { stage }
            | Self::UpstreamError { stage, .. }
            | Self::MalformedAgentOutput { stage, .. } => Some(*stage),
            Self::InvalidImage(_) => Some(PipelineStage::ImageValidation),
        }
    }

    /// Whether resubmitting later may succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaOrRateExceeded { .. } | Self::UpstreamTimeout { .. } | Self::UpstreamError { .. }
        )
    }

    pub(crate) fn upstream(stage: PipelineStage, err: LlmGatewayError) -> Self {
        match err {
            LlmGatewayError::Timeout => Self::UpstreamTimeout { stage },
            other => Self::UpstreamError {
                stage,
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn store(stage: PipelineStage, err: StoreError) -> Self {
        Self::UpstreamError {
            stage,
            message: err.to_string(),
        }
    }

    pub(crate) fn memory(err: MemoryStoreError) -> Self {
        Self::UpstreamError {
            stage: PipelineStage::Memory,
            message: err.to_string(),
        }
    }

    pub(crate) fn object_store(err: ObjectStoreError) -> Self {
        Self::UpstreamError {
            stage: PipelineStage::MediaPresign,
            message: err.to_string(),
        }
    }

    pub(crate) fn malformed(stage: PipelineStage, err: OutputValidationError) -> Self {
        Self::MalformedAgentOutput {
            stage,
            reason: err.to_string(),
        }
    }

    /// Maps an input-side guardrail failure. Rate rejections keep their own variant.
    pub(crate) fn from_input_guardrail(err: GuardrailError) -> Self {
        match err {
            GuardrailError::Blocked {
                reason:
                    GuardrailReason::RateLimited {
                        scope,
                        retry_after_seconds,
                    },
                ..
            } => Self::QuotaOrRateExceeded {
                scope: scope.as_str(),
                retry_after_seconds,
            },
            GuardrailError::Blocked { guardrail, reason } => Self::GuardrailBlocked {
                guardrail,
                reason: reason.to_string(),
            },
            GuardrailError::Upstream { source, .. } => {
                Self::upstream(PipelineStage::InputGuardrails, source)
            }
        }
    }

    /// Any output-side rejection is a structural failure of the agent that produced it.
    pub(crate) fn from_output_guardrail(stage: PipelineStage, err: GuardrailError) -> Self {
        match err {
            GuardrailError::Blocked { guardrail, reason } => Self::MalformedAgentOutput {
                stage,
                reason: format!("{guardrail}: {reason}"),
            },
            GuardrailError::Upstream { source, .. } => Self::upstream(stage, source),
        }
    }

    pub(crate) fn from_flight(stage: PipelineStage, err: SingleFlightError<Self>) -> Self {
        match err {
            SingleFlightError::Upstream(err) => err,
            SingleFlightError::Aborted { reason, .. } => Self::UpstreamError {
                stage,
                message: format!("shared work aborted: {reason}"),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeBuildError {
    #[error("assistant runtime requires a {0}")]
    MissingCollaborator(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
