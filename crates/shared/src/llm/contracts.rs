use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::search::FilterSpec;

/// Which agent role a model call serves. Drives prompt selection, output contract and
/// telemetry labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    SafetyClassifier,
    Router,
    FilterExtraction,
    SearchSynthesis,
    Conversation,
    ImageCaption,
}

impl AgentCapability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SafetyClassifier => "safety_classifier",
            Self::Router => "router",
            Self::FilterExtraction => "filter_extraction",
            Self::SearchSynthesis => "search_synthesis",
            Self::Conversation => "conversation",
            Self::ImageCaption => "image_caption",
        }
    }

    /// Capabilities whose reply must be a single JSON object.
    pub const fn expects_json(self) -> bool {
        matches!(
            self,
            Self::FilterExtraction | Self::SearchSynthesis | Self::ImageCaption
        )
    }
}

/// Factual description of a property photo. Location is never inferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ImageCaption {
    pub style: String,
    pub exterior_material: String,
    pub stories: Option<u32>,
    pub property_type: Option<String>,
    pub features: Vec<String>,
    pub condition: Option<String>,
    pub summary: String,
}

impl ImageCaption {
    /// Flattened text used as embedding input.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![
            format!("style: {}", self.style.trim()),
            format!("exterior: {}", self.exterior_material.trim()),
        ];
        if let Some(stories) = self.stories {
            parts.push(format!("stories: {stories}"));
        }
        if let Some(property_type) = self.property_type.as_deref() {
            parts.push(format!("type: {}", property_type.trim()));
        }
        if !self.features.is_empty() {
            parts.push(format!("features: {}", self.features.join(", ")));
        }
        if let Some(condition) = self.condition.as_deref() {
            parts.push(format!("condition: {}", condition.trim()));
        }
        parts.push(self.summary.trim().to_string());
        parts.join("; ")
    }
}

/// Synthesis reply: the ids of the listings it was given, in the order given, plus a
/// short explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SynthesisContract {
    pub listing_ids: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("output contract payload is invalid: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("capability {0} has no json output contract")]
    NoContract(&'static str),
}

pub fn output_schema(capability: AgentCapability) -> Option<Value> {
    match capability {
        AgentCapability::FilterExtraction => Some(
            serde_json::to_value(schema_for!(FilterSpec))
                .expect("filter spec schema should be serializable"),
        ),
        AgentCapability::SearchSynthesis => Some(
            serde_json::to_value(schema_for!(SynthesisContract))
                .expect("synthesis schema should be serializable"),
        ),
        AgentCapability::ImageCaption => Some(
            serde_json::to_value(schema_for!(ImageCaption))
                .expect("image caption schema should be serializable"),
        ),
        AgentCapability::SafetyClassifier
        | AgentCapability::Router
        | AgentCapability::Conversation => None,
    }
}
