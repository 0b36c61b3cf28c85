use serde::Serialize;
use shared::llm::{
    AgentCapability, ChatMessage, ChatRequest, complete_with_telemetry, template_for_capability,
};
use tracing::warn;

use super::Pipeline;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    Chat,
    Search,
}

impl Route {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Search => "search",
        }
    }
}

/// Closed two-label parse. `None` means the router answered outside its contract.
pub(crate) fn parse_route_label(raw: &str) -> Option<Route> {
    let label = raw
        .trim()
        .trim_matches(|ch: char| !ch.is_ascii_alphabetic())
        .to_ascii_uppercase();
    match label.as_str() {
        "CHAT" => Some(Route::Chat),
        "SEARCH" => Some(Route::Search),
        _ => None,
    }
}

pub(super) async fn classify(
    pipeline: &Pipeline,
    requester_id: &str,
    text: &str,
) -> Result<Route, PipelineError> {
    let request = ChatRequest::from_template(template_for_capability(AgentCapability::Router))
        .with_requester_id(requester_id)
        .with_message(ChatMessage::user(text));
    let (result, _) = complete_with_telemetry(
        pipeline.chat_model.as_ref(),
        request,
        pipeline.config.model_timeout(),
        requester_id,
    )
    .await;
    let completion = result.map_err(|err| PipelineError::upstream(PipelineStage::Routing, err))?;

    Ok(match parse_route_label(&completion.text) {
        Some(route) => route,
        None => {
            warn!(
                requester_id,
                anomaly = "classification_ambiguous",
                label = completion.text.chars().take(64).collect::<String>(),
                "router returned an unrecognized label, defaulting to chat"
            );
            Route::Chat
        }
    })
}
