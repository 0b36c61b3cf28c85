use std::fmt;

use serde::{Deserialize, Serialize};

const IDENTITY_PREFIX: &str = "user";
const TRANSPORT_PREFIX: &str = "session";

/// Stable identifier binding a sequence of turns to one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Resolves the conversation key: explicit header, then authenticated identity, then the
/// transport session. `transport_session` is only invoked for the last case and may
/// create a session as a side effect.
pub fn resolve_session_key<F>(
    header_session_id: Option<&str>,
    authenticated_identity: Option<&str>,
    transport_session: F,
) -> SessionKey
where
    F: FnOnce() -> String,
{
    if let Some(header) = non_blank(header_session_id) {
        return SessionKey(header.to_string());
    }

    if let Some(identity) = non_blank(authenticated_identity) {
        return SessionKey(format!("{IDENTITY_PREFIX}:{identity}"));
    }

    let transport_id = transport_session();
    SessionKey(format!("{TRANSPORT_PREFIX}:{}", transport_id.trim()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
