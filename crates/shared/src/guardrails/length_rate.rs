use std::sync::Arc;

use super::{GuardrailFuture, GuardrailReason, GuardrailVerdict, InputCandidate, InputGuardrail};
use crate::rate_limit::{RateLimitDecision, RateLimitWindow};

/// Rejects empty or over-long input, then charges the session's rate window. Over-long
/// input is rejected before it can consume quota.
pub struct LengthAndRateGuardrail {
    max_input_chars: usize,
    rate_limits: Arc<RateLimitWindow>,
}

impl LengthAndRateGuardrail {
    pub fn new(max_input_chars: usize, rate_limits: Arc<RateLimitWindow>) -> Self {
        Self {
            max_input_chars,
            rate_limits,
        }
    }

    fn evaluate(&self, input: InputCandidate<'_>) -> GuardrailVerdict {
        if input.text.trim().is_empty() {
            return GuardrailVerdict::block(GuardrailReason::EmptyInput);
        }

        let length = input.text.chars().count();
        if length > self.max_input_chars {
            return GuardrailVerdict::block(GuardrailReason::InputTooLong {
                length,
                max: self.max_input_chars,
            });
        }

        match self.rate_limits.check(input.session_key.as_str()) {
            RateLimitDecision::Allowed => GuardrailVerdict::allow(),
            RateLimitDecision::Denied {
                scope,
                retry_after_seconds,
            } => GuardrailVerdict::block(GuardrailReason::RateLimited {
                scope,
                retry_after_seconds,
            }),
        }
    }
}

impl InputGuardrail for LengthAndRateGuardrail {
    fn name(&self) -> &'static str {
        "length_and_rate"
    }

    fn validate<'a>(&'a self, input: InputCandidate<'a>) -> GuardrailFuture<'a> {
        Box::pin(async move { Ok(self.evaluate(input)) })
    }
}
