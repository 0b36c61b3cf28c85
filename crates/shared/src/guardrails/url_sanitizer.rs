use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{GuardrailVerdict, OutputCandidate, OutputGuardrail};

pub const REMOVED_LINK_PLACEHOLDER: &str = "[link removed]";

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];

static URL_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:[a-z][a-z0-9+.\-]*://|(?:javascript|data|vbscript|file|blob|about|mailto|tel):)[^\s<>"'`\\]+"#,
    )
    .expect("url candidate pattern should compile")
});

/// Replaces every URL whose scheme is not http, https, mailto or tel.
///
/// Candidates end before a backslash so JSON string escapes survive the rewrite.
pub fn sanitize_urls(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    let mut cursor = 0;

    for found in URL_CANDIDATE.find_iter(text) {
        let candidate = trim_trailing_punctuation(found.as_str());
        let end = found.start() + candidate.len();
        sanitized.push_str(&text[cursor..found.start()]);
        if is_allowed(candidate) {
            sanitized.push_str(candidate);
        } else {
            sanitized.push_str(REMOVED_LINK_PLACEHOLDER);
        }
        cursor = end;
    }
    sanitized.push_str(&text[cursor..]);
    sanitized
}

/// Drops sentence punctuation after a URL. Closing brackets stay when the URL opened them.
fn trim_trailing_punctuation(candidate: &str) -> &str {
    let mut end = candidate.len();
    while let Some(ch) = candidate[..end].chars().next_back() {
        let open = match ch {
            ')' => Some('('),
            ']' => Some('['),
            '}' => Some('{'),
            _ => None,
        };
        let keep = match open {
            Some(open) => {
                let head = &candidate[..end];
                head.matches(open).count() >= head.matches(ch).count()
            }
            None => !TRAILING_PUNCTUATION.contains(&ch),
        };
        if keep {
            break;
        }
        end -= ch.len_utf8();
    }
    &candidate[..end]
}

fn is_allowed(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => ALLOWED_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

pub struct UrlSanitizationGuardrail;

impl Default for UrlSanitizationGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlSanitizationGuardrail {
    pub fn new() -> Self {
        Self
    }
}

impl OutputGuardrail for UrlSanitizationGuardrail {
    fn name(&self) -> &'static str {
        "url_sanitization"
    }

    fn validate(&self, output: &OutputCandidate<'_>) -> GuardrailVerdict {
        let sanitized = sanitize_urls(output.text);
        if sanitized == output.text {
            GuardrailVerdict::allow()
        } else {
            GuardrailVerdict::transform(sanitized)
        }
    }
}
