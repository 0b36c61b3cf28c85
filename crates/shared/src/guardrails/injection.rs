use regex::RegexSet;

use super::{GuardrailFuture, GuardrailReason, GuardrailVerdict, InputCandidate, InputGuardrail};

const PATTERNS: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"\b(ignore|disregard|forget|override|bypass)\b.{0,40}\b(previous|prior|above|earlier|all|any|your|the|system)\b.{0,20}\b(instructions?|prompts?|rules|directions|guidelines|messages?)\b",
    ),
    (
        "system_prompt_exfiltration",
        r"\b(reveal|print|show|repeat|output|dump|leak|display|tell me)\b.{0,40}\b(system\s+prompt|hidden\s+prompt|developer\s+message|initial\s+instructions|your\s+instructions)\b",
    ),
    (
        "secret_exfiltration",
        r"\b(reveal|exfiltrate|send me|dump|leak|print)\b.{0,40}\b(api\s*keys?|passwords?|secrets?|tokens?|credentials)\b",
    ),
    (
        "role_takeover",
        r"\b(you are now|from now on you are|pretend (to be|you are)|act as (an? )?(unfiltered|unrestricted|uncensored|evil|jailbroken))\b",
    ),
    (
        "jailbreak_request",
        r"\b(jailbreak|jailbroken|do anything now|dan mode|developer mode|god mode|no restrictions)\b",
    ),
    (
        "templated_directive",
        r"(<\|?\s*(system|im_start|im_end|endoftext)\s*\|?>|\[\[?\s*(system|inst)\s*\]\]?|\{\{\s*system|^\s*#{2,}\s*(system|instruction)|(^|\n)\s*system\s*:)",
    ),
    (
        "tool_call_injection",
        r"\b(function call|tool call|execute (this|the following) (code|command)|return raw json)\b",
    ),
];

/// Case-insensitive pattern match for instruction overrides, jailbreak requests and
/// smuggled system directives.
pub struct PromptInjectionGuardrail {
    patterns: RegexSet,
}

impl Default for PromptInjectionGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptInjectionGuardrail {
    pub fn new() -> Self {
        let patterns = RegexSet::new(PATTERNS.iter().map(|(_, pattern)| format!("(?is){pattern}")))
            .expect("prompt injection patterns should compile");
        Self { patterns }
    }

    /// Name of the first matching pattern, if any.
    pub fn matched_pattern(&self, text: &str) -> Option<&'static str> {
        let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let raw_matches = self.patterns.matches(text);
        let compact_matches = self.patterns.matches(&compact);
        raw_matches
            .iter()
            .chain(compact_matches.iter())
            .min()
            .map(|index| PATTERNS[index].0)
    }
}

impl InputGuardrail for PromptInjectionGuardrail {
    fn name(&self) -> &'static str {
        "prompt_injection"
    }

    fn validate<'a>(&'a self, input: InputCandidate<'a>) -> GuardrailFuture<'a> {
        Box::pin(async move {
            Ok(match self.matched_pattern(input.text) {
                Some(pattern) => GuardrailVerdict::block(GuardrailReason::PromptInjection { pattern }),
                None => GuardrailVerdict::allow(),
            })
        })
    }
}
