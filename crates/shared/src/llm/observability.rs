use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::contracts::AgentCapability;
use super::embedding::EmbeddingModel;
use super::gateway::{ChatCompletion, ChatModel, ChatRequest, LlmGatewayError};

#[derive(Debug, Clone)]
pub struct LlmTelemetryEvent {
    pub capability: &'static str,
    pub outcome: &'static str,
    pub latency_ms: u64,
    pub provider: String,
    pub model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub estimated_cost_usd: Option<f64>,
    pub error_type: Option<&'static str>,
}

/// Runs one model call under `timeout`, then logs and returns its telemetry. An elapsed
/// timeout is reported as [`LlmGatewayError::Timeout`]; nothing is retried here.
pub async fn complete_with_telemetry(
    model: &dyn ChatModel,
    request: ChatRequest,
    timeout: Duration,
    requester_id: &str,
) -> (Result<ChatCompletion, LlmGatewayError>, LlmTelemetryEvent) {
    let capability = request.capability;
    let started_at = Instant::now();
    let result = match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmGatewayError::Timeout),
    };
    let telemetry = telemetry_for_result(capability, started_at.elapsed(), &result);
    log_telemetry(requester_id, &telemetry);
    (result, telemetry)
}

pub async fn embed_with_telemetry(
    model: &dyn EmbeddingModel,
    text: &str,
    timeout: Duration,
    requester_id: &str,
) -> Result<Vec<f32>, LlmGatewayError> {
    let started_at = Instant::now();
    let result = match tokio::time::timeout(timeout, model.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(LlmGatewayError::Timeout),
    };
    let latency_ms = duration_to_millis(started_at.elapsed());

    match &result {
        Ok(vector) => info!(
            requester_id,
            capability = "embedding",
            outcome = "success",
            latency_ms,
            dimensions = vector.len(),
            "llm request metrics"
        ),
        Err(err) => warn!(
            requester_id,
            capability = "embedding",
            outcome = "failure",
            latency_ms,
            error_type = error_type(err),
            "llm request metrics"
        ),
    }
    result
}

pub fn log_telemetry(requester_id: &str, telemetry: &LlmTelemetryEvent) {
    if telemetry.outcome == "success" {
        info!(
            requester_id,
            capability = telemetry.capability,
            outcome = telemetry.outcome,
            provider = telemetry.provider.as_str(),
            model = ?telemetry.model,
            latency_ms = telemetry.latency_ms,
            prompt_tokens = ?telemetry.prompt_tokens,
            completion_tokens = ?telemetry.completion_tokens,
            total_tokens = ?telemetry.total_tokens,
            estimated_cost_usd = ?telemetry.estimated_cost_usd,
            "llm request metrics"
        );
    } else {
        warn!(
            requester_id,
            capability = telemetry.capability,
            outcome = telemetry.outcome,
            provider = telemetry.provider.as_str(),
            latency_ms = telemetry.latency_ms,
            error_type = ?telemetry.error_type,
            "llm request metrics"
        );
    }
}

fn telemetry_for_result(
    capability: AgentCapability,
    latency: Duration,
    result: &Result<ChatCompletion, LlmGatewayError>,
) -> LlmTelemetryEvent {
    let latency_ms = duration_to_millis(latency);
    match result {
        Ok(response) => {
            let usage = response.usage.clone().unwrap_or_default();
            let has_usage = response.usage.is_some();
            let estimated_cost_usd = if has_usage {
                estimate_cost_usd(
                    &response.model,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                )
            } else {
                None
            };

            LlmTelemetryEvent {
                capability: capability.as_str(),
                outcome: "success",
                latency_ms,
                provider: provider_from_model(&response.model),
                model: Some(response.model.clone()),
                prompt_tokens: has_usage.then_some(usage.prompt_tokens),
                completion_tokens: has_usage.then_some(usage.completion_tokens),
                total_tokens: has_usage.then_some(usage.total_tokens),
                estimated_cost_usd,
                error_type: None,
            }
        }
        Err(err) => LlmTelemetryEvent {
            capability: capability.as_str(),
            outcome: "failure",
            latency_ms,
            provider: "openrouter".to_string(),
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            estimated_cost_usd: None,
            error_type: Some(error_type(err)),
        },
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn provider_from_model(model: &str) -> String {
    model
        .split('/')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("openrouter")
        .to_string()
}

fn error_type(error: &LlmGatewayError) -> &'static str {
    match error {
        LlmGatewayError::Timeout => "timeout",
        LlmGatewayError::ProviderFailure(_) => "provider_failure",
        LlmGatewayError::InvalidProviderPayload(_) => "invalid_provider_payload",
    }
}

fn estimate_cost_usd(model: &str, prompt_tokens: u32, completion_tokens: u32) -> Option<f64> {
    let pricing = pricing_for_model(model)?;
    let prompt = f64::from(prompt_tokens);
    let completion = f64::from(completion_tokens);
    let total = (prompt * pricing.input_per_million + completion * pricing.output_per_million)
        / 1_000_000.0;
    Some((total * 1_000_000.0).round() / 1_000_000.0)
}

#[derive(Debug, Clone, Copy)]
struct ModelPricing {
    input_per_million: f64,
    output_per_million: f64,
}

fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    let normalized = model.trim().to_ascii_lowercase();
    if normalized.starts_with("openai/gpt-4o-mini") {
        return Some(ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        });
    }

    if normalized.starts_with("anthropic/claude-3.5-haiku") {
        return Some(ModelPricing {
            input_per_million: 0.80,
            output_per_million: 4.00,
        });
    }

    None
}
