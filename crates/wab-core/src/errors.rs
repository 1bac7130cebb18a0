use std::path::PathBuf;

use crate::domain::RecipientId;

/// Core error type for the agent.
///
/// Adapter crates should map their specific errors into this type so the
/// session loop and dispatch engine can tell recoverable failures apart from
/// the ones that need a full re-authentication.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),

    /// Credentials were rejected by the backend; a new login is required.
    #[error("authentication expired")]
    AuthExpired,

    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("send to {recipient} failed: {reason}")]
    SendFailed {
        recipient: RecipientId,
        reason: String,
    },

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
}

impl Error {
    pub fn send_failed(recipient: &RecipientId, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            recipient: recipient.clone(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
