pub mod config;
pub mod config_env;
pub mod guardrails;
pub mod listing_store;
pub mod llm;
pub mod media;
pub mod memory;
pub mod models;
pub mod rate_limit;
pub mod search;
pub mod session;
pub mod single_flight;
