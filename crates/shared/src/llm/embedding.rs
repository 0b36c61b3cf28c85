use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::gateway::LlmGatewayError;
use crate::config::ConfigError;
use crate::config_env::{optional_trimmed_env, parse_u64_env, require_non_empty_env};

const DEFAULT_EMBEDDINGS_URL: &str = "https://openrouter.ai/api/v1/embeddings";
const DEFAULT_EMBEDDINGS_MODEL: &str = "openai/text-embedding-3-small";
const DEFAULT_EMBEDDINGS_TIMEOUT_MS: u64 = 10_000;

pub type EmbeddingFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<f32>, LlmGatewayError>> + Send + 'a>>;

pub trait EmbeddingModel: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub embeddings_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self, EmbeddingConfigError> {
        let api_key = match optional_trimmed_env("EMBEDDINGS_API_KEY") {
            Some(key) => key,
            None => require_non_empty_env("OPENROUTER_API_KEY")?,
        };
        let embeddings_url = optional_trimmed_env("EMBEDDINGS_URL")
            .unwrap_or_else(|| DEFAULT_EMBEDDINGS_URL.to_string());
        if !embeddings_url.starts_with("http://") && !embeddings_url.starts_with("https://") {
            return Err(EmbeddingConfigError::InvalidConfiguration(
                "EMBEDDINGS_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            embeddings_url,
            api_key,
            model: optional_trimmed_env("EMBEDDINGS_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDINGS_MODEL.to_string()),
            timeout_ms: parse_u64_env("EMBEDDINGS_TIMEOUT_MS", DEFAULT_EMBEDDINGS_TIMEOUT_MS)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingConfigError {
    #[error(transparent)]
    Env(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to build embeddings http client: {0}")]
    HttpClient(String),
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct HttpEmbeddingModel {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingModel {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| EmbeddingConfigError::HttpClient(err.to_string()))?;
        Ok(Self { client, config })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, LlmGatewayError> {
        let response = self
            .client
            .post(&self.config.embeddings_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmGatewayError::Timeout
                } else {
                    LlmGatewayError::ProviderFailure("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmGatewayError::ProviderFailure(format!(
                "status={}",
                status.as_u16()
            )));
        }

        let parsed = response.json::<EmbeddingResponse>().await.map_err(|_| {
            LlmGatewayError::InvalidProviderPayload("response_json_parse_failed".to_string())
        })?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| LlmGatewayError::InvalidProviderPayload("missing_embedding".to_string()))?;

        if embedding.is_empty() {
            return Err(LlmGatewayError::InvalidProviderPayload(
                "empty_embedding".to_string(),
            ));
        }
        Ok(embedding)
    }
}

impl EmbeddingModel for HttpEmbeddingModel {
    fn embed<'a>(&'a self, text: &'a str) -> EmbeddingFuture<'a> {
        Box::pin(self.request_embedding(text))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}
