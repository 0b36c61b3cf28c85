use std::env;

use crate::config::ConfigError;

pub fn require_non_empty_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

pub fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw.parse::<u32>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

pub fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

pub fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

pub fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool(key.to_string())),
        },
        None => Ok(default),
    }
}

pub fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
