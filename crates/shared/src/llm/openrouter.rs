use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;

use super::contracts::AgentCapability;
use super::gateway::{
    ChatCompletion, ChatMessage, ChatModel, ChatModelFuture, ChatRequest, LlmGatewayError,
    LlmTokenUsage, ResponseFormat,
};
use crate::config::ConfigError;
use crate::config_env::{optional_trimmed_env, parse_u32_env, parse_u64_env, require_non_empty_env};
use crate::models::ChatRole;

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MAX_RETRIES: u32 = 0;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;

const DEFAULT_PRIMARY_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_VISION_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenRouterModelRoute {
    pub primary_model: String,
    pub fallback_model: Option<String>,
}

impl OpenRouterModelRoute {
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            primary_model: model.into(),
            fallback_model: None,
        }
    }

    fn candidate_models(&self) -> Vec<&str> {
        let mut candidates = Vec::new();
        if !self.primary_model.is_empty() {
            candidates.push(self.primary_model.as_str());
        }

        if let Some(fallback_model) = self.fallback_model.as_deref()
            && !fallback_model.is_empty()
            && fallback_model != self.primary_model
        {
            candidates.push(fallback_model);
        }

        candidates
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterGatewayConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub model_route: OpenRouterModelRoute,
    pub vision_model: String,
    pub classifier_model: Option<String>,
}

impl OpenRouterGatewayConfig {
    pub fn from_env() -> Result<Self, OpenRouterConfigError> {
        let api_key = require_non_empty_env("OPENROUTER_API_KEY")?;
        let chat_completions_url = optional_trimmed_env("OPENROUTER_CHAT_COMPLETIONS_URL")
            .unwrap_or_else(|| DEFAULT_CHAT_COMPLETIONS_URL.to_string());
        if !chat_completions_url.starts_with("http://")
            && !chat_completions_url.starts_with("https://")
        {
            return Err(OpenRouterConfigError::InvalidConfiguration(
                "OPENROUTER_CHAT_COMPLETIONS_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            chat_completions_url,
            api_key,
            timeout_ms: parse_u64_env("OPENROUTER_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            max_retries: parse_u32_env("OPENROUTER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_u64_env(
                "OPENROUTER_RETRY_BASE_BACKOFF_MS",
                DEFAULT_RETRY_BASE_BACKOFF_MS,
            )?,
            model_route: OpenRouterModelRoute {
                primary_model: optional_trimmed_env("OPENROUTER_MODEL_PRIMARY")
                    .unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
                fallback_model: optional_trimmed_env("OPENROUTER_MODEL_FALLBACK"),
            },
            vision_model: optional_trimmed_env("OPENROUTER_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            classifier_model: optional_trimmed_env("OPENROUTER_CLASSIFIER_MODEL"),
        })
    }

    fn route_for(&self, capability: AgentCapability) -> OpenRouterModelRoute {
        match capability {
            AgentCapability::ImageCaption => OpenRouterModelRoute::single(&self.vision_model),
            AgentCapability::SafetyClassifier => match self.classifier_model.as_deref() {
                Some(model) => OpenRouterModelRoute::single(model),
                None => self.model_route.clone(),
            },
            _ => self.model_route.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OpenRouterConfigError {
    #[error(transparent)]
    Env(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to build OpenRouter http client: {0}")]
    HttpClient(String),
}

/// Chat-completions adapter for OpenRouter and other OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenRouterGateway {
    client: reqwest::Client,
    config: OpenRouterGatewayConfig,
}

impl OpenRouterGateway {
    pub fn new(config: OpenRouterGatewayConfig) -> Result<Self, OpenRouterConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| OpenRouterConfigError::HttpClient(err.to_string()))?;

        Ok(Self { client, config })
    }

    async fn complete_with_retries(
        &self,
        model: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, AttemptFailure> {
        let mut attempt = 0_u32;
        loop {
            let failure = match self.attempt(model, request).await {
                Ok(completion) => return Ok(completion),
                Err(failure) => failure,
            };
            if failure.recovery != Recovery::RetrySameModel || attempt >= self.config.max_retries {
                return Err(failure);
            }
            sleep(self.backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.config.retry_base_backoff_ms.saturating_mul(multiplier))
    }

    async fn attempt(
        &self,
        model: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, AttemptFailure> {
        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body(model, request))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AttemptFailure::stop(LlmGatewayError::Timeout)
                } else {
                    AttemptFailure::retry(LlmGatewayError::ProviderFailure(
                        "request_unavailable".to_string(),
                    ))
                }
            })?;

        let status = response.status();
        let request_id = header_request_id(response.headers());
        let body = response
            .text()
            .await
            .map_err(|_| AttemptFailure::fallback(invalid_payload("response_body_read_failed")))?;

        if !status.is_success() {
            return Err(AttemptFailure {
                error: LlmGatewayError::ProviderFailure(format!(
                    "status={} code={}",
                    status.as_u16(),
                    provider_error_code(&body)
                )),
                recovery: recovery_for_status(status),
            });
        }

        let envelope: CompletionEnvelope = serde_json::from_str(&body)
            .map_err(|_| AttemptFailure::fallback(invalid_payload("response_json_parse_failed")))?;
        envelope
            .into_completion(model, request_id)
            .map_err(AttemptFailure::fallback)
    }
}

impl ChatModel for OpenRouterGateway {
    fn complete<'a>(&'a self, request: ChatRequest) -> ChatModelFuture<'a> {
        Box::pin(async move {
            let route = self.config.route_for(request.capability);
            let mut last_error =
                LlmGatewayError::ProviderFailure("no_openrouter_model_candidates".to_string());

            for model in route.candidate_models() {
                match self.complete_with_retries(model, &request).await {
                    Ok(completion) => return Ok(completion),
                    Err(failure) if failure.recovery == Recovery::Stop => return Err(failure.error),
                    Err(failure) => last_error = failure.error,
                }
            }
            Err(last_error)
        })
    }
}

fn request_body(model: &str, request: &ChatRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system_prompt) = request.system_prompt.as_deref() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    messages.extend(request.messages.iter().map(message_json));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": 0
    });
    if request.response_format == ResponseFormat::JsonObject {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(requester_id) = request.requester_id.as_deref() {
        body["user"] = json!(requester_id);
    }
    body
}

fn message_json(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };

    match message.image_data_url.as_deref() {
        Some(image_url) => json!({
            "role": role,
            "content": [
                { "type": "text", "text": message.text },
                { "type": "image_url", "image_url": { "url": image_url } }
            ]
        }),
        None => json!({ "role": role, "content": message.text }),
    }
}

/// What the gateway may do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Transient: retry the same model, then fall back once retries run out.
    RetrySameModel,
    TryFallback,
    /// Timeouts and credential failures end the call.
    Stop,
}

#[derive(Debug)]
struct AttemptFailure {
    error: LlmGatewayError,
    recovery: Recovery,
}

impl AttemptFailure {
    fn retry(error: LlmGatewayError) -> Self {
        Self {
            error,
            recovery: Recovery::RetrySameModel,
        }
    }

    fn fallback(error: LlmGatewayError) -> Self {
        Self {
            error,
            recovery: Recovery::TryFallback,
        }
    }

    fn stop(error: LlmGatewayError) -> Self {
        Self {
            error,
            recovery: Recovery::Stop,
        }
    }
}

fn recovery_for_status(status: StatusCode) -> Recovery {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Recovery::Stop,
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Recovery::RetrySameModel,
        _ => Recovery::TryFallback,
    }
}

fn invalid_payload(code: &str) -> LlmGatewayError {
    LlmGatewayError::InvalidProviderPayload(code.to_string())
}

#[derive(Debug, Deserialize)]
struct CompletionEnvelope {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<ChoiceEnvelope>,
    usage: Option<UsageEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ChoiceEnvelope {
    message: MessageEnvelope,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl CompletionEnvelope {
    fn into_completion(
        self,
        requested_model: &str,
        header_request_id: Option<String>,
    ) -> Result<ChatCompletion, LlmGatewayError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_payload("missing_choice"))?;
        let text = content_text(choice.message.content)
            .ok_or_else(|| invalid_payload("unsupported_content_shape"))?;
        if text.trim().is_empty() {
            return Err(invalid_payload("empty_content"));
        }

        Ok(ChatCompletion {
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            provider_request_id: header_request_id.or(self.id),
            text,
            usage: self.usage.map(LlmTokenUsage::from),
        })
    }
}

impl From<UsageEnvelope> for LlmTokenUsage {
    fn from(usage: UsageEnvelope) -> Self {
        let saturate = |value: Option<u64>| u32::try_from(value.unwrap_or(0)).unwrap_or(u32::MAX);
        Self {
            prompt_tokens: saturate(usage.prompt_tokens),
            completion_tokens: saturate(usage.completion_tokens),
            total_tokens: saturate(usage.total_tokens),
        }
    }
}

/// Providers answer with a string, a list of text parts, or (rarely) a bare object.
fn content_text(content: Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
        ),
        value @ Value::Object(_) => Some(value.to_string()),
        _ => None,
    }
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn provider_error_code(body: &str) -> String {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| payload.pointer("/error/code").cloned());
    match code {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{Recovery, content_text, provider_error_code, recovery_for_status, request_body};
    use crate::llm::contracts::AgentCapability;
    use crate::llm::gateway::{ChatMessage, ChatRequest};
    use crate::llm::prompts::template_for_capability;

    #[test]
    fn json_capabilities_request_json_object_format() {
        let request = ChatRequest::from_template(template_for_capability(
            AgentCapability::FilterExtraction,
        ))
        .with_message(ChatMessage::user("3 bed in austin"));
        let body = request_body("openai/gpt-4o-mini", &request);

        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "3 bed in austin");
    }

    #[test]
    fn image_messages_use_content_parts() {
        let request =
            ChatRequest::from_template(template_for_capability(AgentCapability::ImageCaption))
                .with_message(
                    ChatMessage::user("describe this").with_image("data:image/png;base64,AAAA"),
                );
        let body = request_body("openai/gpt-4o-mini", &request);

        let parts = body["messages"][1]["content"]
            .as_array()
            .expect("content should be parts");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn content_parts_are_joined_and_numbers_rejected() {
        assert_eq!(
            content_text(json!([{"type": "text", "text": "SEA"}, {"type": "text", "text": "RCH"}])),
            Some("SEARCH".to_string())
        );
        assert_eq!(content_text(json!(42)), None);
    }

    #[test]
    fn credential_failures_never_fall_back() {
        assert_eq!(recovery_for_status(StatusCode::UNAUTHORIZED), Recovery::Stop);
        assert_eq!(
            recovery_for_status(StatusCode::SERVICE_UNAVAILABLE),
            Recovery::RetrySameModel
        );
        assert_eq!(recovery_for_status(StatusCode::BAD_REQUEST), Recovery::TryFallback);
        assert_eq!(provider_error_code(r#"{"error":{"code":429}}"#), "429");
        assert_eq!(provider_error_code("not json"), "unknown");
    }

    #[test]
    fn text_capabilities_leave_format_unset() {
        let request = ChatRequest::from_template(template_for_capability(AgentCapability::Router))
            .with_message(ChatMessage::user("hello"));
        let body = request_body("m", &request);
        assert!(body.get("response_format").is_none());
    }
}
