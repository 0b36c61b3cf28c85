use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use super::{GuardrailFuture, GuardrailReason, GuardrailVerdict, InputCandidate, InputGuardrail};
use crate::llm::{
    AgentCapability, ChatMessage, ChatModel, ChatRequest, complete_with_telemetry,
    template_for_capability,
};

static RED_FLAG_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(bomb|explosives?|meth(amphetamine)?|cocaine|heroin|fentanyl|child\s+porn\w*|murder|kill\s+(him|her|them|someone|my\s+\w+)|suicide|self[-\s]harm|ethnic\s+cleansing|whites?\s+only|no\s+(blacks|muslims|jews|immigrants|mexicans|asians))\b",
    )
    .expect("red flag keyword pattern should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierLabel {
    Allow,
    Block,
}

/// Strict two-label parse. Surrounding whitespace and punctuation are tolerated, anything
/// else is unrecognized.
pub fn parse_classifier_label(raw: &str) -> Option<ClassifierLabel> {
    let label = raw
        .trim()
        .trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
        .to_ascii_uppercase();
    match label.as_str() {
        "ALLOW" => Some(ClassifierLabel::Allow),
        "BLOCK" => Some(ClassifierLabel::Block),
        _ => None,
    }
}

pub fn is_small_talk(text: &str) -> bool {
    let normalized = normalize_small_talk(text);
    matches!(
        normalized.as_str(),
        "hi" | "hello"
            | "hey"
            | "hi there"
            | "hello there"
            | "good morning"
            | "good afternoon"
            | "good evening"
            | "how are you"
            | "how are you doing"
            | "how are you doing today"
            | "hi how are you"
            | "hello how are you"
            | "hey how are you"
            | "whats up"
            | "what s up"
            | "sup"
            | "yo"
            | "thanks"
            | "thank you"
            | "thanks a lot"
            | "bye"
            | "goodbye"
    )
}

pub fn red_flag_keyword(text: &str) -> Option<String> {
    RED_FLAG_KEYWORDS
        .find(text)
        .map(|found| found.as_str().to_ascii_lowercase())
}

/// Local allow-list, then local deny-list, then a remote ALLOW/BLOCK classifier. Any
/// classifier reply other than those two labels blocks.
pub struct SafetyClassificationGuardrail {
    classifier: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl SafetyClassificationGuardrail {
    pub fn new(classifier: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
        }
    }
}

impl InputGuardrail for SafetyClassificationGuardrail {
    fn name(&self) -> &'static str {
        "safety_classification"
    }

    fn validate<'a>(&'a self, input: InputCandidate<'a>) -> GuardrailFuture<'a> {
        Box::pin(async move {
            if is_small_talk(input.text) {
                return Ok(GuardrailVerdict::allow());
            }

            if let Some(keyword) = red_flag_keyword(input.text) {
                return Ok(GuardrailVerdict::block(GuardrailReason::UnsafeContent {
                    keyword,
                }));
            }

            let request =
                ChatRequest::from_template(template_for_capability(AgentCapability::SafetyClassifier))
                    .with_requester_id(input.session_key.as_str())
                    .with_message(ChatMessage::user(input.text));
            let (result, _) = complete_with_telemetry(
                self.classifier.as_ref(),
                request,
                self.timeout,
                input.session_key.as_str(),
            )
            .await;
            let completion = result?;

            Ok(match parse_classifier_label(&completion.text) {
                Some(ClassifierLabel::Allow) => GuardrailVerdict::allow(),
                Some(ClassifierLabel::Block) => {
                    GuardrailVerdict::block(GuardrailReason::ClassifierBlocked)
                }
                None => {
                    warn!(
                        session_key = input.session_key.as_str(),
                        label = completion.text.as_str(),
                        "safety classifier returned an unrecognized label"
                    );
                    GuardrailVerdict::block(GuardrailReason::ClassifierUnrecognizedLabel {
                        label: completion.text.trim().chars().take(64).collect(),
                    })
                }
            })
        })
    }
}

fn normalize_small_talk(text: &str) -> String {
    text.to_ascii_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch.is_ascii_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
