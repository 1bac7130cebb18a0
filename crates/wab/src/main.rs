use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast::error::RecvError, Mutex};
use tokio_util::sync::CancellationToken;

use wab_bridge::{BridgeConfig, BridgeTransport};
use wab_core::{
    config::Config,
    cooldown::CooldownEngine,
    credentials::FileCredentialStore,
    links::{LinkCollector, LinkFile},
    messaging::{
        port::{MessagingPort, StdoutLoginDisplay},
        throttled::ThrottledMessenger,
        timeout::TimeoutMessenger,
        types::OutboundPayload,
    },
    session::{SessionMachine, SessionState},
    utils::AuditLogger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wab_core::logging::init("wab")?;

    let cfg = Config::load().context("failed to load configuration")?;

    let links = LinkCollector::open(LinkFile::new(&cfg.links_file))
        .with_context(|| format!("failed to open {}", cfg.links_file.display()))?;
    tracing::info!(
        count = links.links().len(),
        "loaded collected links from {}",
        cfg.links_file.display()
    );

    let audit = Arc::new(AuditLogger::new(&cfg.audit_log_path, cfg.audit_log_json));

    let transport = Arc::new(BridgeTransport::new(BridgeConfig::new(
        &cfg.bridge_program,
        cfg.bridge_args.clone(),
    )));
    let machine = Arc::new(SessionMachine::new(
        transport.clone(),
        Arc::new(FileCredentialStore::new(&cfg.auth_dir)),
        Arc::new(StdoutLoginDisplay),
        cfg.reconnect,
    ));

    let sender: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        Arc::new(TimeoutMessenger::new(
            Arc::new(machine.sender()),
            cfg.send_timeout,
        )),
        cfg.throttle,
    ));

    let engine = CooldownEngine::new(
        sender.clone(),
        cfg.greeting.clone(),
        links,
        cfg.cooldown_window,
    )
    .with_commands(cfg.commands)
    .with_audit(audit.clone());
    machine.on_inbound_event(Arc::new(engine))?;

    let shutdown = CancellationToken::new();

    if cfg.broadcast_on_open {
        spawn_broadcast_on_open(
            &machine,
            sender.clone(),
            cfg.greeting.clone(),
            audit.clone(),
            shutdown.clone(),
        );
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        });
    }

    tracing::info!(
        cooldown_secs = cfg.cooldown_window.as_secs(),
        parts = cfg.greeting.parts().len(),
        "starting session"
    );
    let res = machine.run(shutdown.clone()).await;
    shutdown.cancel();
    transport.shutdown().await;

    res.context("session ended")?;
    Ok(())
}

/// Broadcast the payload to every group each time the session opens.
fn spawn_broadcast_on_open(
    machine: &SessionMachine,
    sender: Arc<dyn MessagingPort>,
    payload: OutboundPayload,
    audit: Arc<AuditLogger>,
    shutdown: CancellationToken,
) {
    let mut transitions = machine.subscribe();
    // Overlapping opens must not run two broadcasts at once.
    let running = Arc::new(Mutex::new(()));

    tokio::spawn(async move {
        loop {
            let state = tokio::select! {
              _ = shutdown.cancelled() => return,
              state = transitions.recv() => state,
            };
            match state {
                Ok(SessionState::Open) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("missed {n} session transitions");
                    continue;
                }
                Err(RecvError::Closed) => return,
            }

            let Ok(guard) = running.clone().try_lock_owned() else {
                tracing::info!("broadcast already running; skipping");
                continue;
            };
            let sender = sender.clone();
            let payload = payload.clone();
            let audit = audit.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let res =
                    wab_core::broadcast::run_once(sender.as_ref(), &payload, Some(audit.as_ref()))
                        .await;
                match res {
                    Ok(report) => tracing::info!(
                        sent = report.sent.len(),
                        failed = report.failed.len(),
                        "broadcast finished"
                    ),
                    Err(e) => tracing::error!("broadcast failed: {e}"),
                }
            });
        }
    });
}
