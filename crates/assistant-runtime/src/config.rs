use std::path::PathBuf;
use std::time::Duration;

use shared::config::{ConfigError, GuardrailConfig, RateLimitConfig};
use shared::config_env::{optional_trimmed_env, parse_u64_env, parse_usize_env};

const DEFAULT_MODEL_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CHAT_MEMORY_MAX_TURNS: usize = 20;
const DEFAULT_CHAT_CONTEXT_WINDOW_TURNS: usize = 12;
const DEFAULT_SEARCH_RESULT_LIMIT: usize = 20;
const DEFAULT_IMAGE_MAX_DIMENSION: u32 = 1_024;
const DEFAULT_IMAGE_SEARCH_DEFAULT_K: usize = 12;
const DEFAULT_MEDIA_PRESIGN_TTL_SECONDS: u64 = 900;
const DEFAULT_MEDIA_MAX_URLS_PER_LISTING: usize = 3;
const DEFAULT_MEDIA_BASE_URL: &str = "http://127.0.0.1:9000/listing-media";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub guardrails: GuardrailConfig,
    pub rate_limits: RateLimitConfig,
    pub model_timeout_ms: u64,
    pub embedding_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub chat_memory_max_turns: usize,
    /// Turns of history sent with a conversational reply. Never more than the memory keeps.
    pub chat_context_window_turns: usize,
    pub search_result_limit: usize,
    pub image_max_dimension: u32,
    pub image_search_default_k: usize,
    pub media_presign_ttl_seconds: u64,
    pub media_max_urls_per_listing: usize,
    pub redis_url: Option<String>,
    pub listings_path: Option<PathBuf>,
    pub media_base_url: String,
    pub media_signing_secret: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            guardrails: GuardrailConfig::default(),
            rate_limits: RateLimitConfig::default(),
            model_timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            chat_memory_max_turns: DEFAULT_CHAT_MEMORY_MAX_TURNS,
            chat_context_window_turns: DEFAULT_CHAT_CONTEXT_WINDOW_TURNS,
            search_result_limit: DEFAULT_SEARCH_RESULT_LIMIT,
            image_max_dimension: DEFAULT_IMAGE_MAX_DIMENSION,
            image_search_default_k: DEFAULT_IMAGE_SEARCH_DEFAULT_K,
            media_presign_ttl_seconds: DEFAULT_MEDIA_PRESIGN_TTL_SECONDS,
            media_max_urls_per_listing: DEFAULT_MEDIA_MAX_URLS_PER_LISTING,
            redis_url: None,
            listings_path: None,
            media_base_url: DEFAULT_MEDIA_BASE_URL.to_string(),
            media_signing_secret: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let image_max_dimension = parse_u64_env(
            "IMAGE_MAX_DIMENSION",
            u64::from(defaults.image_max_dimension),
        )?;
        let config = Self {
            guardrails: GuardrailConfig::from_env()?,
            rate_limits: RateLimitConfig::from_env()?,
            model_timeout_ms: parse_u64_env("MODEL_TIMEOUT_MS", defaults.model_timeout_ms)?,
            embedding_timeout_ms: parse_u64_env(
                "EMBEDDING_TIMEOUT_MS",
                defaults.embedding_timeout_ms,
            )?,
            store_timeout_ms: parse_u64_env("STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            chat_memory_max_turns: parse_usize_env(
                "CHAT_MEMORY_MAX_TURNS",
                defaults.chat_memory_max_turns,
            )?,
            chat_context_window_turns: parse_usize_env(
                "CHAT_CONTEXT_WINDOW_TURNS",
                defaults.chat_context_window_turns,
            )?,
            search_result_limit: parse_usize_env(
                "SEARCH_RESULT_LIMIT",
                defaults.search_result_limit,
            )?,
            image_max_dimension: u32::try_from(image_max_dimension).map_err(|_| {
                ConfigError::InvalidConfiguration(
                    "IMAGE_MAX_DIMENSION must fit in 32 bits".to_string(),
                )
            })?,
            image_search_default_k: parse_usize_env(
                "IMAGE_SEARCH_DEFAULT_K",
                defaults.image_search_default_k,
            )?,
            media_presign_ttl_seconds: parse_u64_env(
                "MEDIA_PRESIGN_TTL_SECONDS",
                defaults.media_presign_ttl_seconds,
            )?,
            media_max_urls_per_listing: parse_usize_env(
                "MEDIA_MAX_URLS_PER_LISTING",
                defaults.media_max_urls_per_listing,
            )?,
            redis_url: optional_trimmed_env("REDIS_URL"),
            listings_path: optional_trimmed_env("LISTINGS_PATH").map(PathBuf::from),
            media_base_url: optional_trimmed_env("MEDIA_BASE_URL")
                .unwrap_or(defaults.media_base_url),
            media_signing_secret: optional_trimmed_env("MEDIA_SIGNING_SECRET"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.guardrails.validate()?;
        self.rate_limits.validate()?;

        for (key, value) in [
            ("MODEL_TIMEOUT_MS", self.model_timeout_ms),
            ("EMBEDDING_TIMEOUT_MS", self.embedding_timeout_ms),
            ("STORE_TIMEOUT_MS", self.store_timeout_ms),
            ("MEDIA_PRESIGN_TTL_SECONDS", self.media_presign_ttl_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "{key} must be greater than 0"
                )));
            }
        }
        for (key, value) in [
            ("CHAT_MEMORY_MAX_TURNS", self.chat_memory_max_turns),
            ("SEARCH_RESULT_LIMIT", self.search_result_limit),
            ("IMAGE_SEARCH_DEFAULT_K", self.image_search_default_k),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "{key} must be greater than 0"
                )));
            }
        }
        if self.chat_context_window_turns > self.chat_memory_max_turns {
            return Err(ConfigError::InvalidConfiguration(
                "CHAT_CONTEXT_WINDOW_TURNS must not exceed CHAT_MEMORY_MAX_TURNS".to_string(),
            ));
        }
        if self.image_max_dimension < 64 {
            return Err(ConfigError::InvalidConfiguration(
                "IMAGE_MAX_DIMENSION must be at least 64".to_string(),
            ));
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn media_presign_ttl(&self) -> Duration {
        Duration::from_secs(self.media_presign_ttl_seconds)
    }
}
