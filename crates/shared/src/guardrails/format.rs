use serde_json::Value;

use super::{GuardrailReason, GuardrailVerdict, OutputCandidate, OutputGuardrail};

/// Removes one surrounding markdown code fence (with optional language tag) and trims.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let body = match body.find('\n') {
        Some(newline)
            if body[..newline]
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') =>
        {
            &body[newline + 1..]
        }
        _ => body,
    };
    body.trim()
}

pub fn looks_like_json(text: &str) -> bool {
    (text.starts_with('{') && text.ends_with('}')) || (text.starts_with('[') && text.ends_with(']'))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Strips fences and caps length. JSON-shaped output must parse whenever JSON is
/// mandatory; a reply that must be JSON but is prose is rejected outright.
pub struct FormatGuardrail {
    max_output_chars: usize,
    json_output_mandatory: bool,
}

impl FormatGuardrail {
    pub fn new(max_output_chars: usize, json_output_mandatory: bool) -> Self {
        Self {
            max_output_chars,
            json_output_mandatory,
        }
    }
}

impl OutputGuardrail for FormatGuardrail {
    fn name(&self) -> &'static str {
        "format"
    }

    fn validate(&self, output: &OutputCandidate<'_>) -> GuardrailVerdict {
        let stripped = strip_code_fences(output.text);
        let json_shaped = looks_like_json(stripped);
        let truncated = truncate_chars(stripped, self.max_output_chars);

        if (self.json_output_mandatory || output.expects_json) && json_shaped {
            if let Err(err) = serde_json::from_str::<Value>(truncated) {
                return GuardrailVerdict::block(GuardrailReason::MalformedJson {
                    detail: err.to_string(),
                });
            }
        }

        if output.expects_json && !json_shaped {
            return GuardrailVerdict::block(GuardrailReason::MissingJson);
        }

        if truncated == output.text {
            GuardrailVerdict::allow()
        } else {
            GuardrailVerdict::transform(truncated.to_string())
        }
    }
}
