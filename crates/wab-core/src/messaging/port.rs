use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{Credentials, GroupDescriptor, RecipientId},
    messaging::types::{InboundMessage, TransportEvent},
    Result,
};

/// Narrow outbound capability of a live session.
///
/// The dispatch engine and broadcast job only ever see this, never the whole
/// transport connection.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Resolves once the transport acknowledged the message.
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()>;

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>>;
}

/// One established transport connection.
pub struct Connection {
    pub link: std::sync::Arc<dyn MessagingPort>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The chat-protocol transport (handshake, encryption and encoding live behind it).
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Start a connection. `None` credentials means a fresh login.
    async fn connect(&self, creds: Option<Credentials>) -> Result<Connection>;
}

/// Receives inbound messages from the session loop, one at a time.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_inbound(&self, msg: InboundMessage);
}

/// Operator-facing display for login challenges.
pub trait LoginDisplay: Send + Sync {
    fn show_challenge(&self, code: &str);
}

/// Prints the raw challenge to stdout. Rendering it as a QR image is left to
/// whatever the operator pipes this into.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutLoginDisplay;

impl LoginDisplay for StdoutLoginDisplay {
    fn show_challenge(&self, code: &str) {
        println!("Scan the login code with the phone app to connect:\n{code}");
    }
}
