use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a learner, assigned by the chat transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearnerId(u64);

impl LearnerId {
    /// Creates a new `LearnerId`
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying u64 value
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LearnerId({})", self.0)
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for parsing an ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for LearnerId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(LearnerId::new)
            .map_err(|_| ParseIdError {
                kind: "LearnerId".to_string(),
            })
    }
}

/// Opaque handle to a message delivered through the chat transport.
///
/// Held only to request withdrawal of an outstanding lesson message before
/// its quiz question is shown. The engine never inspects the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(String);

impl MessageRef {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learner_id_display() {
        let id = LearnerId::new(42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn learner_id_from_str() {
        let id: LearnerId = "123".parse().unwrap();
        assert_eq!(id, LearnerId::new(123));
    }

    #[test]
    fn learner_id_from_str_invalid() {
        let result = "not-a-number".parse::<LearnerId>();
        assert!(result.is_err());
    }

    #[test]
    fn learner_id_roundtrip() {
        let original = LearnerId::new(42);
        let deserialized: LearnerId = original.to_string().parse().unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn message_ref_keeps_raw_value() {
        let msg = MessageRef::new("chat:17/412");
        assert_eq!(msg.as_str(), "chat:17/412");
        assert_eq!(msg.to_string(), "chat:17/412");
    }
}
