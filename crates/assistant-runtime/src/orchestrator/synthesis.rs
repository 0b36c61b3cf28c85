use serde_json::{Value, json};
use shared::guardrails::OutputCandidate;
use shared::llm::{
    AgentCapability, ChatMessage, ChatRequest, complete_with_telemetry, template_for_capability,
    validate_synthesis,
};
use shared::models::Listing;
use shared::search::FilterSpec;

use super::Pipeline;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

const DESCRIPTION_SNIPPET_MAX_CHARS: usize = 200;

/// Asks the synthesis model to explain `listings`. The listings themselves never pass
/// through the model's reply; only the explanation is taken from it, and only after the
/// reply echoed the exact ids in the exact order.
pub(super) async fn explain_results(
    pipeline: &Pipeline,
    requester_id: &str,
    filter: &FilterSpec,
    listings: &[Listing],
) -> Result<String, PipelineError> {
    let expected_ids = listings
        .iter()
        .map(|listing| listing.id.clone())
        .collect::<Vec<_>>();
    let request =
        ChatRequest::from_template(template_for_capability(AgentCapability::SearchSynthesis))
            .with_requester_id(requester_id)
            .with_message(ChatMessage::user(synthesis_input(filter, listings).to_string()));
    let (result, _) = complete_with_telemetry(
        pipeline.chat_model.as_ref(),
        request,
        pipeline.config.model_timeout(),
        requester_id,
    )
    .await;
    let completion =
        result.map_err(|err| PipelineError::upstream(PipelineStage::Synthesis, err))?;

    let checked = pipeline
        .guardrails
        .check_output(OutputCandidate::synthesis(&completion.text, &expected_ids))
        .map_err(|err| PipelineError::from_output_guardrail(PipelineStage::Synthesis, err))?;
    let contract = validate_synthesis(&checked)
        .map_err(|err| PipelineError::malformed(PipelineStage::Synthesis, err))?;

    Ok(contract.explanation.trim().to_string())
}

fn synthesis_input(filter: &FilterSpec, listings: &[Listing]) -> Value {
    json!({
        "filter": filter,
        "listings": listings.iter().map(listing_summary).collect::<Vec<_>>(),
    })
}

fn listing_summary(listing: &Listing) -> Value {
    json!({
        "id": listing.id,
        "title": listing.title,
        "city": listing.city,
        "state": listing.state,
        "neighborhood": listing.neighborhood,
        "property_type": listing.property_type,
        "price": listing.price,
        "beds": listing.beds,
        "baths": listing.baths,
        "sqft": listing.sqft,
        "has_parking": listing.has_parking,
        "pets_allowed": listing.pets_allowed,
        "waterfront": listing.waterfront,
        "description": listing
            .description
            .chars()
            .take(DESCRIPTION_SNIPPET_MAX_CHARS)
            .collect::<String>(),
    })
}
