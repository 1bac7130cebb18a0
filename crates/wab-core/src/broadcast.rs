//! One-shot fan-out of a payload to every group the session is in.

use crate::{
    domain::RecipientId,
    messaging::{port::MessagingPort, types::OutboundPayload},
    utils::{AuditEvent, AuditLogger},
    Result,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: Vec<RecipientId>,
    pub failed: Vec<(RecipientId, String)>,
}

impl BroadcastReport {
    pub fn total(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

/// Send `payload` to each group independently.
///
/// A failing group is logged and recorded in the report; the remaining groups
/// are still attempted. Nothing is retried; run the job again for that.
/// Only listing the groups can fail the whole job.
pub async fn run_once(
    messenger: &dyn MessagingPort,
    payload: &OutboundPayload,
    audit: Option<&AuditLogger>,
) -> Result<BroadcastReport> {
    tracing::info!("fetching groups");
    let groups = messenger.list_groups().await?;
    tracing::info!(count = groups.len(), "groups found");

    let mut report = BroadcastReport::default();
    if groups.is_empty() {
        tracing::warn!("no groups found (or no permission to list them)");
        return Ok(report);
    }

    'groups: for group in groups {
        tracing::info!(group = %group.id, subject = %group.subject, "broadcasting");
        for part in payload.parts() {
            if let Err(e) = messenger.send_text(&group.id, part).await {
                tracing::error!(group = %group.id, subject = %group.subject, error = %e, "broadcast send failed");
                report.failed.push((group.id, e.to_string()));
                continue 'groups;
            }
        }
        tracing::info!(group = %group.id, subject = %group.subject, "broadcast delivered");
        report.sent.push(group.id);
    }

    if let Some(audit) = audit {
        audit.record(AuditEvent::broadcast(report.sent.len(), report.failed.len()));
    }
    Ok(report)
}
