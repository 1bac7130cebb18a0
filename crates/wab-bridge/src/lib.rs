//! Transport adapter backed by an external bridge process.
//!
//! The bridge owns the chat protocol (handshake, encryption, encoding) and
//! talks to us over newline-delimited JSON on stdin/stdout; see [`protocol`].
//! Each `connect` spawns a fresh bridge and kills the previous one.

pub mod protocol;

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use wab_core::{
    domain::{Credentials, GroupDescriptor, RecipientId},
    errors::Error,
    messaging::{
        port::{Connection, MessagingPort, TransportPort},
        types::{DisconnectCause, TransportEvent},
    },
    utils::truncate_text,
    Result,
};

use crate::protocol::{Reply, Request, Routed};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

/// How long a bridge that closed stdout gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub event_buffer: usize,
}

impl BridgeConfig {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            event_buffer: 64,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Requests waiting for an `ack`/`groups` reply. Once `closed` is set no new
/// waiters are accepted.
#[derive(Default)]
struct PendingTable {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

type Pending = Arc<Mutex<PendingTable>>;

pub struct BridgeTransport {
    cfg: BridgeConfig,
    active: Mutex<Option<CancellationToken>>,
}

impl BridgeTransport {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self {
            cfg,
            active: Mutex::new(None),
        }
    }

    /// Stop the current bridge process, if any.
    pub async fn shutdown(&self) {
        if let Some(token) = self.active.lock().await.take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl TransportPort for BridgeTransport {
    async fn connect(&self, creds: Option<Credentials>) -> Result<Connection> {
        self.shutdown().await;

        let token = CancellationToken::new();
        {
            let mut guard = self.active.lock().await;
            *guard = Some(token.clone());
        }

        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::External(format!(
                "failed to spawn bridge {}: {e}",
                self.cfg.program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::External("bridge stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("bridge stdout was not captured".to_string()))?;
        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr in background to avoid blocking on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tracing::debug!(target: "wab_bridge::stderr", "{line}");
                    tail.lock().await.push_line(line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(PendingTable::default()));
        let link = Arc::new(BridgeLink {
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            token: token.clone(),
        });

        link.write(&Request::Start {
            creds: creds.as_ref().map(|c| &c.0),
        })
        .await?;
        tracing::info!(
            fresh_login = creds.is_none(),
            "bridge started: {}",
            self.cfg.program.display()
        );

        let (tx, rx) = mpsc::channel(self.cfg.event_buffer.max(1));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(queue_rx, tx));
        tokio::spawn(pump(child, stdout, stderr_tail, pending, queue_tx, token));

        Ok(Connection { link, events: rx })
    }
}

/// Outbound half of one bridge connection. Dropping the last handle stops
/// the bridge process.
pub struct BridgeLink {
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    token: CancellationToken,
}

impl Drop for BridgeLink {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl BridgeLink {
    async fn write(&self, req: &Request<'_>) -> Result<()> {
        let line = req.encode()?;
        let mut stdin = self.stdin.lock().await;
        let res = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        res.map_err(|e| {
            tracing::debug!("bridge stdin write failed: {e}");
            Error::NotConnected
        })
    }

    async fn call(&self, id: u64, req: &Request<'_>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(Error::NotConnected);
            }
            pending.waiters.insert(id, tx);
        }

        if let Err(e) = self.write(req).await {
            self.pending.lock().await.waiters.remove(&id);
            return Err(e);
        }

        // Sender dropped: the bridge went away before replying.
        rx.await.map_err(|_| Error::NotConnected)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingPort for BridgeLink {
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()> {
        let id = self.next_id();
        let req = Request::Send {
            id,
            to: to.as_str(),
            text,
        };
        match self.call(id, &req).await? {
            Reply::Ack { ok: true, .. } => Ok(()),
            Reply::Ack { ok: false, error } => Err(Error::send_failed(
                to,
                error.unwrap_or_else(|| "rejected by bridge".to_string()),
            )),
            Reply::Groups(_) => Err(Error::External(format!(
                "bridge answered send {id} with a group list"
            ))),
        }
    }

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
        let id = self.next_id();
        match self.call(id, &Request::ListGroups { id }).await? {
            Reply::Groups(groups) => Ok(groups),
            Reply::Ack { error, .. } => Err(Error::External(format!(
                "bridge could not list groups: {}",
                error.unwrap_or_else(|| "no reason given".to_string())
            ))),
        }
    }
}

/// Hands queued events to the session at its own pace.
///
/// The session waits on send acks while handling an event, and those acks
/// arrive on the same stdout as the events, so the reader must never block
/// on the session.
async fn forward(
    mut queue: mpsc::UnboundedReceiver<TransportEvent>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(ev) = queue.recv().await {
        if events.send(ev).await.is_err() {
            return;
        }
    }
}

/// Reads bridge stdout until EOF or cancellation, routing replies to their
/// waiters and everything else to the event queue.
async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<StderrTail>>,
    pending: Pending,
    events: mpsc::UnboundedSender<TransportEvent>,
    token: CancellationToken,
) {
    let mut reader = BufReader::new(stdout).lines();
    let ended = loop {
        tokio::select! {
          _ = token.cancelled() => break None,
          line = reader.next_line() => {
            let line = match line {
              Ok(Some(line)) => line,
              Ok(None) => break Some("bridge closed its output".to_string()),
              Err(e) => break Some(format!("bridge stdout read failed: {e}")),
            };
            if line.trim().is_empty() {
              continue;
            }

            let event = match protocol::decode(&line) {
              Ok(v) => v,
              Err(e) => {
                tracing::warn!("skipping unparseable bridge line ({e}): {}", truncate_text(&line, 200));
                continue;
              }
            };

            match protocol::route(event) {
              Routed::Reply(id, reply) => {
                let waiter = pending.lock().await.waiters.remove(&id);
                match waiter {
                  Some(tx) => { let _ = tx.send(reply); }
                  None => tracing::debug!(id, "bridge reply for unknown request"),
                }
              }
              Routed::Event(ev) => {
                if events.send(ev).is_err() {
                  // Session dropped this connection.
                  break None;
                }
              }
              Routed::Skip => {}
            }
          }
        }
    };

    {
        let mut table = pending.lock().await;
        table.closed = true;
        table.waiters.clear();
    }

    let Some(mut reason) = ended else {
        kill_child(&mut child).await;
        return;
    };

    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => reason.push_str(&format!(" ({status})")),
        Ok(Err(e)) => reason.push_str(&format!(" (wait failed: {e})")),
        Err(_) => kill_child(&mut child).await,
    }

    let stderr = stderr_tail.lock().await.snapshot();
    if stderr.trim().is_empty() {
        tracing::warn!("{reason}");
    } else {
        tracing::warn!("{reason}\nstderr (tail):\n{stderr}");
    }

    let _ = events.send(TransportEvent::Closed(DisconnectCause::Transport(reason)));
}

async fn kill_child(child: &mut Child) {
    // If it's already exited, `try_wait` reaps it.
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill bridge process: {e}");
    }
}
