use std::collections::HashSet;

use super::{GuardrailReason, GuardrailVerdict, OutputCandidate, OutputGuardrail};
use crate::llm::validate_synthesis;

/// Synthesis replies must echo the ids they were given, in the same order.
pub struct ResultIntegrityGuardrail;

impl OutputGuardrail for ResultIntegrityGuardrail {
    fn name(&self) -> &'static str {
        "result_integrity"
    }

    fn validate(&self, output: &OutputCandidate<'_>) -> GuardrailVerdict {
        let Some(expected) = output.expected_listing_ids else {
            return GuardrailVerdict::allow();
        };

        let contract = match validate_synthesis(output.text) {
            Ok(contract) => contract,
            Err(err) => {
                return GuardrailVerdict::block(GuardrailReason::MalformedJson {
                    detail: err.to_string(),
                });
            }
        };

        match alteration(expected, &contract.listing_ids) {
            Some(detail) => GuardrailVerdict::block(GuardrailReason::ResultSetAltered {
                detail: detail.to_string(),
            }),
            None => GuardrailVerdict::allow(),
        }
    }
}

fn alteration(expected: &[String], actual: &[String]) -> Option<&'static str> {
    if expected == actual {
        return None;
    }
    let expected_set = expected.iter().collect::<HashSet<_>>();
    let actual_set = actual.iter().collect::<HashSet<_>>();
    if actual_set.iter().any(|id| !expected_set.contains(id)) {
        Some("added")
    } else if expected_set.iter().any(|id| !actual_set.contains(id)) {
        Some("removed")
    } else if actual.len() != expected.len() {
        Some("duplicated")
    } else {
        Some("reordered")
    }
}
