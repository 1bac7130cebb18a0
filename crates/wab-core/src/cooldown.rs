//! Per-recipient greeting dispatch with a sliding cooldown window.
//!
//! For every inbound message the engine decides whether the greeting payload
//! is due now or suppressed until the window since the last successful
//! greeting to that recipient has elapsed. Commands and link collection share
//! the same inbound path but never move the cooldown.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    commands::{format_cleared, format_links, Command, CommandSet},
    domain::RecipientId,
    links::LinkCollector,
    messaging::{
        port::{InboundHandler, MessagingPort},
        types::{InboundMessage, MessageBody, OutboundPayload},
    },
    utils::{AuditEvent, AuditLogger},
    Result,
};

pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(5 * 60 * 60);

/// When each recipient last received a greeting. Process-lifetime only: after
/// a restart every recipient is eligible again.
#[derive(Debug)]
pub struct LastSentRegistry {
    window: Duration,
    last_sent: HashMap<RecipientId, Instant>,
}

impl LastSentRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: HashMap::new(),
        }
    }

    /// Time left before `recipient` may be greeted again, `None` if eligible now.
    pub fn remaining(&self, recipient: &RecipientId, now: Instant) -> Option<Duration> {
        let last = self.last_sent.get(recipient)?;
        let elapsed = now.saturating_duration_since(*last);
        if elapsed < self.window {
            Some(self.window - elapsed)
        } else {
            None
        }
    }

    pub fn record(&mut self, recipient: RecipientId, at: Instant) {
        self.last_sent.insert(recipient, at);
    }

    pub fn last_sent(&self, recipient: &RecipientId) -> Option<Instant> {
        self.last_sent.get(recipient).copied()
    }
}

/// One async mutex per recipient so the cooldown check and the registry update
/// for a key happen as one step.
#[derive(Default)]
pub struct RecipientLocks {
    inner: Mutex<HashMap<RecipientId, Arc<Mutex<()>>>>,
}

impl RecipientLocks {
    pub async fn lock(&self, recipient: &RecipientId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Only the map holds idle entries; holders and waiters own a clone.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(recipient.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// What the engine did with one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A command ran; `replied` tells whether the response made it out.
    Command { command: Command, replied: bool },
    /// Nothing greeting-worthy (non-text body).
    Ignored,
    /// Greeted too recently.
    Suppressed { remaining: Duration },
    /// Greeting sent; every part was acknowledged.
    Emitted(Vec<String>),
}

pub struct CooldownEngine {
    messenger: Arc<dyn MessagingPort>,
    payload: OutboundPayload,
    commands: CommandSet,
    registry: Mutex<LastSentRegistry>,
    locks: RecipientLocks,
    links: Arc<Mutex<LinkCollector>>,
    audit: Option<Arc<AuditLogger>>,
}

impl CooldownEngine {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        payload: OutboundPayload,
        links: LinkCollector,
        window: Duration,
    ) -> Self {
        Self {
            messenger,
            payload,
            commands: CommandSet::default(),
            registry: Mutex::new(LastSentRegistry::new(window)),
            locks: RecipientLocks::default(),
            links: Arc::new(Mutex::new(links)),
            audit: None,
        }
    }

    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn links(&self) -> Arc<Mutex<LinkCollector>> {
        self.links.clone()
    }

    pub async fn last_sent(&self, recipient: &RecipientId) -> Option<Instant> {
        self.registry.lock().await.last_sent(recipient)
    }

    /// Decide and act on one inbound message observed at `now`.
    ///
    /// A failed send aborts the remaining parts, leaves the registry untouched
    /// (so the next message retries) and is returned for the caller to log.
    pub async fn handle_inbound(
        &self,
        recipient: &RecipientId,
        body: &MessageBody,
        now: Instant,
    ) -> Result<Outcome> {
        if let MessageBody::Text(text) = body {
            if let Some(command) = Command::parse(text, self.commands) {
                return Ok(self.run_command(recipient, command).await);
            }
        }

        if let Some(text) = body.scannable_text() {
            let added = self.links.lock().await.scan(text).await;
            if !added.is_empty() {
                self.audit(AuditEvent::links_collected(recipient, added));
            }
        }

        if !matches!(body, MessageBody::Text(_)) {
            tracing::debug!(recipient = %recipient, "non-text message; no greeting");
            return Ok(Outcome::Ignored);
        }

        let _guard = self.locks.lock(recipient).await;

        let remaining = self.registry.lock().await.remaining(recipient, now);
        if let Some(remaining) = remaining {
            tracing::info!(
                recipient = %recipient,
                remaining_secs = remaining.as_secs(),
                "greeting suppressed; cooldown active"
            );
            self.audit(AuditEvent::greeting_suppressed(recipient, remaining.as_secs()));
            return Ok(Outcome::Suppressed { remaining });
        }

        let parts = self.payload.parts();
        for (idx, part) in parts.iter().enumerate() {
            if let Err(e) = self.messenger.send_text(recipient, part).await {
                tracing::warn!(
                    recipient = %recipient,
                    part = idx + 1,
                    of = parts.len(),
                    error = %e,
                    "greeting aborted; cooldown not advanced"
                );
                self.audit(AuditEvent::send_error(recipient, &e.to_string()));
                return Err(e);
            }
        }

        self.registry.lock().await.record(recipient.clone(), now);
        tracing::info!(recipient = %recipient, parts = parts.len(), "greeting sent");
        self.audit(AuditEvent::greeting_sent(recipient, parts.len()));

        Ok(Outcome::Emitted(parts.to_vec()))
    }

    async fn run_command(&self, recipient: &RecipientId, command: Command) -> Outcome {
        let response = {
            let mut links = self.links.lock().await;
            match command {
                Command::Links => format_links(links.links()),
                Command::ClearLinks => format_cleared(links.clear().await),
            }
        };

        let replied = match self.messenger.send_text(recipient, &response).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    recipient = %recipient,
                    command = command.token(),
                    error = %e,
                    "command reply failed"
                );
                false
            }
        };
        self.audit(AuditEvent::command(recipient, command.token(), &response));

        Outcome::Command { command, replied }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

#[async_trait]
impl InboundHandler for CooldownEngine {
    async fn on_inbound(&self, msg: InboundMessage) {
        if msg.from_me {
            tracing::trace!(recipient = %msg.recipient, "skipping own message");
            return;
        }

        match self
            .handle_inbound(&msg.recipient, &msg.body, Instant::now())
            .await
        {
            Ok(outcome) => tracing::debug!(recipient = %msg.recipient, ?outcome, "inbound handled"),
            Err(e) => tracing::error!(recipient = %msg.recipient, error = %e, "inbound handling failed"),
        }
    }
}
