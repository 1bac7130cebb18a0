//! Session lifecycle: connect → (login challenge) → open → closed → reconnect.
//!
//! The machine never gives up on its own: every close re-enters `Connecting`.
//! Expired credentials are wiped before the next connect so the transport
//! starts a fresh login; any other cause reconnects with backoff.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::ReconnectPolicy,
    credentials::CredentialStore,
    domain::{GroupDescriptor, RecipientId},
    errors::Error,
    messaging::{
        port::{Connection, InboundHandler, LoginDisplay, MessagingPort, TransportPort},
        types::{DisconnectCause, InboundMessage, TransportEvent},
    },
    Result,
};

const TRANSITION_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingScan,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingScan => "awaiting_scan",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Current state plus the live link, swapped together.
struct Slot {
    state: SessionState,
    link: Option<Arc<dyn MessagingPort>>,
}

async fn live_link(slot: &RwLock<Slot>) -> Result<Arc<dyn MessagingPort>> {
    let slot = slot.read().await;
    match (&slot.state, &slot.link) {
        (SessionState::Open, Some(link)) => Ok(link.clone()),
        _ => Err(Error::NotConnected),
    }
}

/// How one connection round ended.
enum RoundEnd {
    Shutdown,
    Disconnected {
        cause: DisconnectCause,
        reached_open: bool,
    },
}

pub struct SessionMachine {
    transport: Arc<dyn TransportPort>,
    credentials: Arc<dyn CredentialStore>,
    display: Arc<dyn LoginDisplay>,
    policy: ReconnectPolicy,
    slot: Arc<RwLock<Slot>>,
    transitions: broadcast::Sender<SessionState>,
    handler: OnceLock<Arc<dyn InboundHandler>>,
    ever_opened: AtomicBool,
}

impl SessionMachine {
    pub fn new(
        transport: Arc<dyn TransportPort>,
        credentials: Arc<dyn CredentialStore>,
        display: Arc<dyn LoginDisplay>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            transport,
            credentials,
            display,
            policy,
            slot: Arc::new(RwLock::new(Slot {
                state: SessionState::Connecting,
                link: None,
            })),
            transitions,
            handler: OnceLock::new(),
            ever_opened: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.slot.read().await.state
    }

    /// Every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    /// Register the inbound message handler. Only one may ever be registered.
    pub fn on_inbound_event(&self, handler: Arc<dyn InboundHandler>) -> Result<()> {
        self.handler
            .set(handler)
            .map_err(|_| Error::Config("inbound handler already registered".to_string()))
    }

    /// The live link, or `NotConnected` unless the session is open.
    pub async fn current_send_capability(&self) -> Result<Arc<dyn MessagingPort>> {
        live_link(&self.slot).await
    }

    /// Send capability that follows the session across reconnects.
    pub fn sender(&self) -> SessionSender {
        SessionSender {
            slot: self.slot.clone(),
        }
    }

    /// Keep the session alive until `shutdown` fires.
    ///
    /// Returns an error only when the reconnect policy runs out of attempts.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                self.transition(SessionState::Closed, None).await;
                return Ok(());
            }
            self.transition(SessionState::Connecting, None).await;

            let creds = match self.credentials.load().await {
                Ok(creds) => creds,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load credentials; starting a fresh login");
                    None
                }
            };
            tracing::info!(fresh_login = creds.is_none(), "connecting");

            let connected = tokio::select! {
                biased;
                res = self.transport.connect(creds) => res,
                _ = shutdown.cancelled() => {
                    self.transition(SessionState::Closed, None).await;
                    return Ok(());
                }
            };

            let end = match connected {
                Ok(conn) => self.drive(conn, &shutdown).await,
                Err(Error::AuthExpired) => RoundEnd::Disconnected {
                    cause: DisconnectCause::AuthExpired,
                    reached_open: false,
                },
                Err(e) => RoundEnd::Disconnected {
                    cause: DisconnectCause::Transport(format!("connect failed: {e}")),
                    reached_open: false,
                },
            };

            self.transition(SessionState::Closed, None).await;

            let (cause, reached_open) = match end {
                RoundEnd::Shutdown => return Ok(()),
                RoundEnd::Disconnected {
                    cause,
                    reached_open,
                } => (cause, reached_open),
            };
            if reached_open {
                failures = 0;
            }

            let delay = match &cause {
                DisconnectCause::AuthExpired => {
                    tracing::warn!("authentication expired; wiping credentials for a fresh login");
                    if let Err(e) = self.credentials.wipe().await {
                        tracing::error!(error = %e, "failed to wipe credentials");
                    }
                    // A fresh login right after a working session needs no wait.
                    if failures == 0 {
                        std::time::Duration::ZERO
                    } else {
                        self.policy.next_delay(failures)
                    }
                }
                DisconnectCause::Transport(reason) => {
                    tracing::warn!(reason = %reason, "transport disconnected; reconnecting");
                    self.policy.next_delay(failures)
                }
            };

            failures = failures.saturating_add(1);
            if self.policy.exhausted(failures) {
                tracing::error!(failures, "giving up on reconnecting");
                return Err(Error::TransportDisconnected(format!(
                    "gave up after {failures} consecutive failures (last: {cause:?})"
                )));
            }

            if !delay.is_zero() {
                tracing::info!(delay_ms = delay.as_millis() as u64, attempt = failures, "waiting before reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
    }

    async fn drive(&self, conn: Connection, shutdown: &CancellationToken) -> RoundEnd {
        let Connection { link, mut events } = conn;
        let mut reached_open = false;

        loop {
            let event = tokio::select! {
                biased;
                ev = events.recv() => ev,
                _ = shutdown.cancelled() => return RoundEnd::Shutdown,
            };
            let Some(event) = event else {
                return RoundEnd::Disconnected {
                    cause: DisconnectCause::Transport("transport event stream ended".to_string()),
                    reached_open,
                };
            };

            match event {
                TransportEvent::LoginChallenge(code) => {
                    if self.state().await == SessionState::Open {
                        tracing::warn!("login challenge while open; ignoring");
                        continue;
                    }
                    self.transition(SessionState::AwaitingScan, None).await;
                    self.display.show_challenge(&code);
                }
                TransportEvent::CredentialsUpdated(creds) => {
                    // Awaited before the next event so later sends never outrun the write.
                    match self.credentials.save(&creds).await {
                        Ok(()) => tracing::debug!("credentials persisted"),
                        Err(e) => {
                            let e = Error::PersistenceFailed(e.to_string());
                            tracing::error!(error = %e, "failed to persist credentials");
                        }
                    }
                }
                TransportEvent::Opened => {
                    reached_open = true;
                    self.ever_opened.store(true, Ordering::SeqCst);
                    self.transition(SessionState::Open, Some(link.clone())).await;
                    tracing::info!("session open");
                }
                TransportEvent::Closed(cause) => {
                    return RoundEnd::Disconnected {
                        cause,
                        reached_open,
                    };
                }
                TransportEvent::Inbound(msg) => self.dispatch(msg).await,
            }
        }
    }

    async fn dispatch(&self, msg: InboundMessage) {
        if !self.ever_opened.load(Ordering::SeqCst) {
            tracing::debug!(recipient = %msg.recipient, "dropping inbound message before first open");
            return;
        }
        let Some(handler) = self.handler.get() else {
            tracing::debug!(recipient = %msg.recipient, "no inbound handler registered");
            return;
        };
        handler.on_inbound(msg).await;
    }

    async fn transition(&self, to: SessionState, link: Option<Arc<dyn MessagingPort>>) {
        let from = {
            let mut slot = self.slot.write().await;
            let from = slot.state;
            slot.state = to;
            slot.link = link;
            from
        };
        if from != to {
            tracing::info!(from = %from, to = %to, "session state changed");
            let _ = self.transitions.send(to);
        }
    }
}

/// Narrow send capability handed to the dispatch engine and broadcast job.
///
/// Resolves the live link on every call, so it keeps working across
/// reconnects and fails with `NotConnected` while the session is down.
#[derive(Clone)]
pub struct SessionSender {
    slot: Arc<RwLock<Slot>>,
}

#[async_trait]
impl MessagingPort for SessionSender {
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()> {
        live_link(&self.slot).await?.send_text(to, text).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
        live_link(&self.slot).await?.list_groups().await
    }
}
