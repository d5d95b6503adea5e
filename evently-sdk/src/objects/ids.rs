//! Identifier newtypes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Identifies an event (and its entrant document, which shares the key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EventId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a participant by email address.
///
/// The address is kept exactly as the client wrote it, and that is what
/// gets stored and used for token lookups. Comparison, ordering and hashing
/// go through a trimmed, lower-cased key, so `Alice@Example.com` and
/// `alice@example.com` are the same entrant.
#[derive(Debug, Clone)]
pub struct ParticipantId {
    raw: String,
    key: String,
}

impl ParticipantId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().to_string();
        let key = raw.trim().to_lowercase();
        Self { raw, key }
    }

    /// The address as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The normalized comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn into_inner(self) -> String {
        self.raw
    }
}

impl PartialEq for ParticipantId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ParticipantId {}

impl PartialOrd for ParticipantId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParticipantId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl std::hash::Hash for ParticipantId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Serialize for ParticipantId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(ParticipantId::new)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_compares_normalized() {
        let written = ParticipantId::new("  Alice@Example.COM ");
        assert_eq!(written, ParticipantId::new("alice@example.com"));
        assert_eq!(written.key(), "alice@example.com");
        assert_eq!(written.as_str(), "  Alice@Example.COM ");

        let parsed: ParticipantId = serde_json::from_str("\"Bob@Example.com\"").unwrap();
        assert_eq!(parsed.as_str(), "Bob@Example.com");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"Bob@Example.com\"");
    }

    #[test]
    fn test_participant_sets_dedup_by_key() {
        let set: std::collections::BTreeSet<ParticipantId> =
            ["Carol@x.org", "carol@x.org", "dave@x.org"]
                .into_iter()
                .map(ParticipantId::from)
                .collect();
        assert_eq!(set.len(), 2);
        // The first spelling inserted is the one kept.
        assert!(set.iter().any(|p| p.as_str() == "Carol@x.org"));
    }
}
