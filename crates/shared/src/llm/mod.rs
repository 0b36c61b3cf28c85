pub mod contracts;
pub mod embedding;
pub mod gateway;
pub mod observability;
pub mod openrouter;
pub mod prompts;
pub mod validation;

pub use contracts::{AgentCapability, ContractError, ImageCaption, SynthesisContract, output_schema};
pub use embedding::{
    EmbeddingConfig, EmbeddingConfigError, EmbeddingFuture, EmbeddingModel, HttpEmbeddingModel,
};
pub use gateway::{
    ChatCompletion, ChatMessage, ChatModel, ChatModelFuture, ChatRequest, LlmGatewayError,
    LlmTokenUsage, ResponseFormat,
};
pub use observability::{
    LlmTelemetryEvent, complete_with_telemetry, embed_with_telemetry, log_telemetry,
};
pub use openrouter::{
    OpenRouterConfigError, OpenRouterGateway, OpenRouterGatewayConfig, OpenRouterModelRoute,
};
pub use prompts::{PromptTemplate, template_for_capability};
pub use validation::{
    OutputValidationError, validate_filter_spec, validate_image_caption, validate_output_json,
    validate_output_value, validate_synthesis,
};
