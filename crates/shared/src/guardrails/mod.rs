use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GuardrailConfig;
use crate::llm::{ChatModel, LlmGatewayError};
use crate::rate_limit::{RateLimitScope, RateLimitWindow};
use crate::session::SessionKey;

pub mod format;
pub mod injection;
pub mod length_rate;
pub mod result_integrity;
pub mod safety;
pub mod url_sanitizer;

pub use format::FormatGuardrail;
pub use injection::PromptInjectionGuardrail;
pub use length_rate::LengthAndRateGuardrail;
pub use result_integrity::ResultIntegrityGuardrail;
pub use safety::SafetyClassificationGuardrail;
pub use url_sanitizer::UrlSanitizationGuardrail;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailReason {
    EmptyInput,
    InputTooLong { length: usize, max: usize },
    RateLimited {
        scope: RateLimitScope,
        retry_after_seconds: u64,
    },
    PromptInjection { pattern: &'static str },
    UnsafeContent { keyword: String },
    ClassifierBlocked,
    ClassifierUnrecognizedLabel { label: String },
    MalformedJson { detail: String },
    MissingJson,
    ResultSetAltered { detail: String },
}

impl fmt::Display for GuardrailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => f.write_str("input is empty"),
            Self::InputTooLong { length, max } => {
                write!(f, "input is {length} characters, maximum is {max}")
            }
            Self::RateLimited {
                scope,
                retry_after_seconds,
            } => write!(
                f,
                "{} rate limit exceeded, retry after {retry_after_seconds}s",
                scope.as_str()
            ),
            Self::PromptInjection { pattern } => {
                write!(f, "input matches prompt-injection pattern {pattern}")
            }
            Self::UnsafeContent { keyword } => write!(f, "input contains unsafe content: {keyword}"),
            Self::ClassifierBlocked => f.write_str("safety classifier blocked the input"),
            Self::ClassifierUnrecognizedLabel { label } => {
                write!(f, "safety classifier returned unrecognized label {label:?}")
            }
            Self::MalformedJson { detail } => write!(f, "output is not valid json: {detail}"),
            Self::MissingJson => f.write_str("output must be a json object"),
            Self::ResultSetAltered { detail } => {
                write!(f, "output altered the result set: {detail}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailVerdict {
    pub allowed: bool,
    pub reason: Option<GuardrailReason>,
    /// Replacement text when the guardrail rewrote its input.
    pub transformed_text: Option<String>,
}

impl GuardrailVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            transformed_text: None,
        }
    }

    pub fn transform(text: String) -> Self {
        Self {
            allowed: true,
            reason: None,
            transformed_text: Some(text),
        }
    }

    pub fn block(reason: GuardrailReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            transformed_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputCandidate<'a> {
    pub session_key: &'a SessionKey,
    pub text: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputCandidate<'a> {
    pub text: &'a str,
    /// This output must be a JSON document regardless of global configuration.
    pub expects_json: bool,
    /// When set, the output is a synthesis reply that must echo exactly these ids.
    pub expected_listing_ids: Option<&'a [String]>,
}

impl<'a> OutputCandidate<'a> {
    pub fn text(text: &'a str) -> Self {
        Self {
            text,
            expects_json: false,
            expected_listing_ids: None,
        }
    }

    pub fn synthesis(text: &'a str, expected_listing_ids: &'a [String]) -> Self {
        Self {
            text,
            expects_json: true,
            expected_listing_ids: Some(expected_listing_ids),
        }
    }
}

pub type GuardrailFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GuardrailVerdict, LlmGatewayError>> + Send + 'a>>;

pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate<'a>(&'a self, input: InputCandidate<'a>) -> GuardrailFuture<'a>;
}

pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, output: &OutputCandidate<'_>) -> GuardrailVerdict;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailError {
    #[error("{guardrail} blocked the request: {reason}")]
    Blocked {
        guardrail: &'static str,
        reason: GuardrailReason,
    },
    #[error("{guardrail} could not complete: {source}")]
    Upstream {
        guardrail: &'static str,
        #[source]
        source: LlmGatewayError,
    },
}

/// Ordered input and output guardrails. Input checks short-circuit on the first block;
/// output checks thread each guardrail's rewrite into the next one.
#[derive(Clone)]
pub struct GuardrailChain {
    input: Vec<Arc<dyn InputGuardrail>>,
    output: Vec<Arc<dyn OutputGuardrail>>,
}

impl GuardrailChain {
    pub fn new(input: Vec<Arc<dyn InputGuardrail>>, output: Vec<Arc<dyn OutputGuardrail>>) -> Self {
        Self { input, output }
    }

    /// Length and rate, prompt injection, safety classification; then format, URL
    /// sanitization and result integrity on the way out.
    pub fn standard(
        config: &GuardrailConfig,
        rate_limits: Arc<RateLimitWindow>,
        classifier: Arc<dyn ChatModel>,
        classifier_timeout: Duration,
    ) -> Self {
        Self::new(
            vec![
                Arc::new(LengthAndRateGuardrail::new(config.max_input_chars, rate_limits)),
                Arc::new(PromptInjectionGuardrail::new()),
                Arc::new(SafetyClassificationGuardrail::new(classifier, classifier_timeout)),
            ],
            vec![
                Arc::new(FormatGuardrail::new(
                    config.max_output_chars,
                    config.json_output_mandatory,
                )),
                Arc::new(UrlSanitizationGuardrail::new()),
                Arc::new(ResultIntegrityGuardrail),
            ],
        )
    }

    pub fn input_names(&self) -> Vec<&'static str> {
        self.input.iter().map(|guardrail| guardrail.name()).collect()
    }

    pub fn output_names(&self) -> Vec<&'static str> {
        self.output.iter().map(|guardrail| guardrail.name()).collect()
    }

    pub async fn check_input(
        &self,
        session_key: &SessionKey,
        text: &str,
    ) -> Result<(), GuardrailError> {
        let candidate = InputCandidate { session_key, text };
        for guardrail in &self.input {
            let verdict = guardrail.validate(candidate).await.map_err(|source| {
                warn!(
                    session_key = session_key.as_str(),
                    guardrail = guardrail.name(),
                    "input guardrail failed upstream: {source}"
                );
                GuardrailError::Upstream {
                    guardrail: guardrail.name(),
                    source,
                }
            })?;

            if !verdict.allowed {
                return Err(blocked(guardrail.name(), verdict.reason, session_key.as_str()));
            }
            debug!(
                session_key = session_key.as_str(),
                guardrail = guardrail.name(),
                "input guardrail passed"
            );
        }
        Ok(())
    }

    pub fn check_output(&self, candidate: OutputCandidate<'_>) -> Result<String, GuardrailError> {
        let mut text = candidate.text.to_string();
        for guardrail in &self.output {
            let current = OutputCandidate {
                text: &text,
                ..candidate
            };
            let verdict = guardrail.validate(&current);
            if !verdict.allowed {
                return Err(blocked(guardrail.name(), verdict.reason, "-"));
            }
            if let Some(transformed) = verdict.transformed_text {
                text = transformed;
            }
        }
        Ok(text)
    }
}

fn blocked(
    guardrail: &'static str,
    reason: Option<GuardrailReason>,
    session_key: &str,
) -> GuardrailError {
    let reason = reason.unwrap_or(GuardrailReason::ClassifierBlocked);
    warn!(session_key, guardrail, reason = %reason, "guardrail blocked");
    GuardrailError::Blocked { guardrail, reason }
}
