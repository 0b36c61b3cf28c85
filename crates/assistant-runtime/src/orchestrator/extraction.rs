use shared::llm::{
    AgentCapability, ChatMessage, ChatRequest, complete_with_telemetry, template_for_capability,
    validate_filter_spec,
};
use shared::search::FilterSpec;
use tracing::debug;

use super::Pipeline;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

/// Raw draft from the extraction model, then the canonical form. Only the canonical
/// form leaves this module.
pub(super) async fn extract_filter(
    pipeline: &Pipeline,
    requester_id: &str,
    text: &str,
) -> Result<FilterSpec, PipelineError> {
    let request =
        ChatRequest::from_template(template_for_capability(AgentCapability::FilterExtraction))
            .with_requester_id(requester_id)
            .with_message(ChatMessage::user(text));
    let (result, _) = complete_with_telemetry(
        pipeline.chat_model.as_ref(),
        request,
        pipeline.config.model_timeout(),
        requester_id,
    )
    .await;
    let completion =
        result.map_err(|err| PipelineError::upstream(PipelineStage::Extraction, err))?;

    let raw = validate_filter_spec(&completion.text)
        .map_err(|err| PipelineError::malformed(PipelineStage::Extraction, err))?;
    let normalized = raw.normalize();
    debug!(
        requester_id,
        unconstrained = normalized.is_unconstrained(),
        "filter extracted"
    );
    Ok(normalized)
}
