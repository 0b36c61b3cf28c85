use shared::guardrails::OutputCandidate;
use shared::llm::{
    AgentCapability, ChatMessage, ChatRequest, complete_with_telemetry, template_for_capability,
};
use shared::session::SessionKey;

use super::Pipeline;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

/// Direct conversational reply over the session's recent turns.
pub(super) async fn converse(
    pipeline: &Pipeline,
    session_key: &SessionKey,
    text: &str,
) -> Result<String, PipelineError> {
    let history = pipeline
        .observers
        .observe(session_key.as_str(), PipelineStage::Memory, async {
            pipeline
                .memory
                .recent(session_key, pipeline.config.chat_context_window_turns)
                .await
                .map_err(PipelineError::memory)
        })
        .await?;

    let request = ChatRequest::from_template(template_for_capability(AgentCapability::Conversation))
        .with_requester_id(session_key.as_str())
        .with_messages(history.iter().map(ChatMessage::from))
        .with_message(ChatMessage::user(text));
    let (result, _) = complete_with_telemetry(
        pipeline.chat_model.as_ref(),
        request,
        pipeline.config.model_timeout(),
        session_key.as_str(),
    )
    .await;
    let completion =
        result.map_err(|err| PipelineError::upstream(PipelineStage::Conversation, err))?;

    let reply = pipeline
        .guardrails
        .check_output(OutputCandidate::text(&completion.text))
        .map_err(|err| PipelineError::from_output_guardrail(PipelineStage::Conversation, err))?;
    if reply.trim().is_empty() {
        return Err(PipelineError::MalformedAgentOutput {
            stage: PipelineStage::Conversation,
            reason: "empty reply".to_string(),
        });
    }
    Ok(reply)
}
