use crate::domain::{Credentials, RecipientId};

/// Body of an inbound message, reduced to what the agent cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// Image/video/document; the caption may still carry links.
    Media { caption: Option<String> },
    /// Reactions, stickers, protocol messages...
    Other,
}

impl MessageBody {
    /// Text the link collector should look at, if any.
    pub fn scannable_text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(t) => Some(t),
            MessageBody::Media { caption } => caption.as_deref(),
            MessageBody::Other => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub recipient: RecipientId,
    pub body: MessageBody,
    /// Echo of a message this account sent itself.
    pub from_me: bool,
}

/// Why a live session went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Credentials were rejected or logged out; needs a fresh login.
    AuthExpired,
    /// Anything else: network drop, server restart, bridge crash.
    Transport(String),
}

/// Events a transport connection reports to the session machine.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The operator must approve this code out-of-band (QR scan).
    LoginChallenge(String),
    CredentialsUpdated(Credentials),
    Opened,
    Closed(DisconnectCause),
    Inbound(InboundMessage),
}

/// Ordered message parts sent as one greeting/broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundPayload {
    parts: Vec<String>,
}

/// A line with only this marker splits a payload file into parts.
pub const PART_SEPARATOR: &str = "---";

impl OutboundPayload {
    pub fn new(parts: Vec<String>) -> Self {
        Self {
            parts: parts.into_iter().filter(|p| !p.trim().is_empty()).collect(),
        }
    }

    /// Parse a payload file: parts separated by lines containing only `---`.
    pub fn parse(text: &str) -> Self {
        let mut parts = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in text.lines() {
            if line.trim() == PART_SEPARATOR {
                parts.push(current.join("\n").trim().to_string());
                current.clear();
            } else {
                current.push(line);
            }
        }
        parts.push(current.join("\n").trim().to_string());
        Self::new(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
