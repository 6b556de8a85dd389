/// Session identifiers and channel topics
///
/// A session identifier is read from the hosting element at mount time and
/// names the channel topic (`<prefix>:<id>`) the relay joins.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between topic prefix and session identifier
pub const TOPIC_SEPARATOR: char = ':';

/// Opaque, non-empty session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a session identifier
    ///
    /// # Errors
    /// - `RelayError::InvalidSessionId`: the value is empty
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(RelayError::InvalidSessionId(id));
        }
        Ok(Self(id))
    }

    /// Interpret an optional attribute value; empty and missing both mean "no session"
    pub fn from_attribute(value: Option<&str>) -> Option<Self> {
        value.and_then(|v| Self::new(v).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Topic for a session: `<prefix>:<id>`
    pub fn for_session(prefix: &str, session: &SessionId) -> Self {
        Self(format!("{}{}{}", prefix, TOPIC_SEPARATOR, session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_rejects_empty() {
        assert!(matches!(
            SessionId::new(""),
            Err(RelayError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_session_id_is_opaque() {
        // Whitespace and punctuation are the caller's business
        let id = SessionId::new(" room 7/b ").unwrap();
        assert_eq!(id.as_str(), " room 7/b ");
    }

    #[test]
    fn test_from_attribute() {
        assert_eq!(SessionId::from_attribute(None), None);
        assert_eq!(SessionId::from_attribute(Some("")), None);
        assert_eq!(
            SessionId::from_attribute(Some("42")),
            Some(SessionId::new("42").unwrap())
        );
    }

    #[test]
    fn test_topic_for_session() {
        let id = SessionId::new("42").unwrap();
        let topic = Topic::for_session("game", &id);

        assert_eq!(topic.as_str(), "game:42");
        assert_eq!(topic.to_string(), "game:42");
    }

    #[test]
    fn test_session_id_serde() {
        let id: SessionId = serde_json::from_str("\"99\"").unwrap();
        assert_eq!(id.as_str(), "99");

        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"99\"");
    }
}
