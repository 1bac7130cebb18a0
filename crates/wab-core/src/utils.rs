use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::{domain::RecipientId, errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Atomic File Writes ==============

/// Replace `path` with `contents` via a sibling temp file + rename.
///
/// A crash mid-write leaves either the old file or the new one, never a
/// truncated mix.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let Some(file_name) = path.file_name() else {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "no file name".to_string(),
        });
    };

    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::Io(e));
    }
    Ok(())
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, recipient: Option<&RecipientId>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            recipient: recipient.map(|r| r.to_string()),
            ..Self::default()
        }
    }

    pub fn greeting_sent(recipient: &RecipientId, parts: usize) -> Self {
        Self {
            parts: Some(parts),
            ..Self::base("greeting_sent", Some(recipient))
        }
    }

    pub fn greeting_suppressed(recipient: &RecipientId, remaining_secs: u64) -> Self {
        Self {
            remaining_secs: Some(remaining_secs),
            ..Self::base("greeting_suppressed", Some(recipient))
        }
    }

    pub fn command(recipient: &RecipientId, command: &str, response: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            content: Some(response.to_string()),
            ..Self::base("command", Some(recipient))
        }
    }

    pub fn links_collected(recipient: &RecipientId, links: Vec<String>) -> Self {
        Self {
            links: Some(links),
            ..Self::base("links_collected", Some(recipient))
        }
    }

    pub fn send_error(recipient: &RecipientId, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::base("send_error", Some(recipient))
        }
    }

    pub fn broadcast(sent: usize, failed: usize) -> Self {
        Self {
            sent: Some(sent),
            failed: Some(failed),
            ..Self::base("broadcast", None)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write and swallow failures; the audit trail never blocks dispatch.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
pub(crate) fn tmp_path(prefix: &str, ext: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static SEQ: AtomicUsize = AtomicUsize::new(0);

    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}-{seq}.{ext}"))
}
