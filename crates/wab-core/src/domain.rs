use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversation endpoint id as supplied by the transport (a contact or a group jid).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientId(String);

impl RecipientId {
    /// Returns `None` for an empty (or whitespace-only) id.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return None;
        }
        Some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecipientId {
    type Error = String;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id).ok_or_else(|| "recipient id must not be empty".to_string())
    }
}

impl From<RecipientId> for String {
    fn from(id: RecipientId) -> Self {
        id.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group the session currently participates in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub id: RecipientId,
    #[serde(default)]
    pub subject: String,
}

/// Opaque authentication material produced by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);
