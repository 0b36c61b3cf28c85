use std::sync::LazyLock;

use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::contracts::{
    AgentCapability, ContractError, ImageCaption, SynthesisContract, output_schema,
};
use crate::guardrails::format::strip_code_fences;
use crate::search::FilterSpec;

#[derive(Debug, Error)]
pub enum OutputValidationError {
    #[error("agent output is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("agent schema for {capability:?} failed to compile: {message}")]
    SchemaCompile {
        capability: AgentCapability,
        message: String,
    },
    #[error("agent output failed schema validation for {capability:?}: {errors:?}")]
    SchemaViolation {
        capability: AgentCapability,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Contract(#[from] ContractError),
}

pub fn validate_filter_spec(raw: &str) -> Result<FilterSpec, OutputValidationError> {
    validate_output_json(AgentCapability::FilterExtraction, raw)
}

pub fn validate_image_caption(raw: &str) -> Result<ImageCaption, OutputValidationError> {
    validate_output_json(AgentCapability::ImageCaption, raw)
}

pub fn validate_synthesis(raw: &str) -> Result<SynthesisContract, OutputValidationError> {
    validate_output_json(AgentCapability::SearchSynthesis, raw)
}

/// Parses a model reply (code fences tolerated), checks it against the capability's
/// schema and deserializes it.
pub fn validate_output_json<T>(
    capability: AgentCapability,
    raw: &str,
) -> Result<T, OutputValidationError>
where
    T: DeserializeOwned,
{
    let payload: Value = serde_json::from_str(strip_code_fences(raw))?;
    validate_output_value(capability, &payload)
}

pub fn validate_output_value<T>(
    capability: AgentCapability,
    payload: &Value,
) -> Result<T, OutputValidationError>
where
    T: DeserializeOwned,
{
    let validator = validator_for_capability(capability)?;

    if let Err(validation_errors) = validator.validate(payload) {
        let errors = validation_errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(OutputValidationError::SchemaViolation { capability, errors });
    }

    serde_json::from_value(payload.clone())
        .map_err(|err| OutputValidationError::Contract(ContractError::Deserialize(err)))
}

static FILTER_EXTRACTION_VALIDATOR: LazyLock<Result<JSONSchema, String>> =
    LazyLock::new(|| compile_validator(AgentCapability::FilterExtraction));

static SEARCH_SYNTHESIS_VALIDATOR: LazyLock<Result<JSONSchema, String>> =
    LazyLock::new(|| compile_validator(AgentCapability::SearchSynthesis));

static IMAGE_CAPTION_VALIDATOR: LazyLock<Result<JSONSchema, String>> =
    LazyLock::new(|| compile_validator(AgentCapability::ImageCaption));

fn compile_validator(capability: AgentCapability) -> Result<JSONSchema, String> {
    let schema = output_schema(capability)
        .ok_or_else(|| ContractError::NoContract(capability.as_str()).to_string())?;
    JSONSchema::compile(&schema).map_err(|err| err.to_string())
}

fn validator_for_capability(
    capability: AgentCapability,
) -> Result<&'static JSONSchema, OutputValidationError> {
    let validator_result = match capability {
        AgentCapability::FilterExtraction => &*FILTER_EXTRACTION_VALIDATOR,
        AgentCapability::SearchSynthesis => &*SEARCH_SYNTHESIS_VALIDATOR,
        AgentCapability::ImageCaption => &*IMAGE_CAPTION_VALIDATOR,
        AgentCapability::SafetyClassifier
        | AgentCapability::Router
        | AgentCapability::Conversation => {
            return Err(OutputValidationError::Contract(ContractError::NoContract(
                capability.as_str(),
            )));
        }
    };

    validator_result
        .as_ref()
        .map_err(|message| OutputValidationError::SchemaCompile {
            capability,
            message: message.clone(),
        })
}
