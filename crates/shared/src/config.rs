use std::time::Duration;

use thiserror::Error;

use crate::config_env::{parse_bool_env, parse_u32_env, parse_u64_env, parse_usize_env};

const DEFAULT_MAX_INPUT_CHARS: usize = 1_000;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 4_000;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_RATE_LIMIT_PER_MINUTE_MAX: u32 = 30;
const DEFAULT_RATE_LIMIT_BURST_WINDOW_SECONDS: u64 = 10;
const DEFAULT_RATE_LIMIT_BURST_MAX: u32 = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {key}: {value}")]
    ParseInt { key: String, value: String },
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

/// Loads a `.env` file when one exists. A missing file is not an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    pub max_input_chars: usize,
    pub max_output_chars: usize,
    pub json_output_mandatory: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            json_output_mandatory: false,
        }
    }
}

impl GuardrailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_input_chars: parse_usize_env("GUARDRAIL_MAX_INPUT_CHARS", defaults.max_input_chars)?,
            max_output_chars: parse_usize_env(
                "GUARDRAIL_MAX_OUTPUT_CHARS",
                defaults.max_output_chars,
            )?,
            json_output_mandatory: parse_bool_env(
                "GUARDRAIL_JSON_OUTPUT_MANDATORY",
                defaults.json_output_mandatory,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_chars == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "GUARDRAIL_MAX_INPUT_CHARS must be greater than 0".to_string(),
            ));
        }
        if self.max_output_chars == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "GUARDRAIL_MAX_OUTPUT_CHARS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub per_minute_max: u32,
    pub burst_window_seconds: u64,
    pub burst_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            per_minute_max: DEFAULT_RATE_LIMIT_PER_MINUTE_MAX,
            burst_window_seconds: DEFAULT_RATE_LIMIT_BURST_WINDOW_SECONDS,
            burst_max: DEFAULT_RATE_LIMIT_BURST_MAX,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            window_seconds: parse_u64_env("RATE_LIMIT_WINDOW_SECONDS", defaults.window_seconds)?,
            per_minute_max: parse_u32_env("RATE_LIMIT_PER_MINUTE_MAX", defaults.per_minute_max)?,
            burst_window_seconds: parse_u64_env(
                "RATE_LIMIT_BURST_WINDOW_SECONDS",
                defaults.burst_window_seconds,
            )?,
            burst_max: parse_u32_env("RATE_LIMIT_BURST_MAX", defaults.burst_max)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "RATE_LIMIT_WINDOW_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.per_minute_max == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "RATE_LIMIT_PER_MINUTE_MAX must be greater than 0".to_string(),
            ));
        }
        if self.burst_window_seconds == 0 || self.burst_window_seconds > self.window_seconds {
            return Err(ConfigError::InvalidConfiguration(
                "RATE_LIMIT_BURST_WINDOW_SECONDS must be between 1 and RATE_LIMIT_WINDOW_SECONDS"
                    .to_string(),
            ));
        }
        if self.burst_max == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "RATE_LIMIT_BURST_MAX must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub(crate) fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_seconds)
    }
}
