//! Hypervisor backup job notifications (vzdump).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{display_time, summarize_list, CanonicalMessage, Severity};
use crate::document::Document;
use crate::error::FormatError;

/// `  100  web01  ok  00:01:12  1.20GB  /mnt/dump/vzdump-qemu-100.vma.zst`
static GUEST_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(\d{2,})\s+(\S+)\s+(ok|err|error|failed)\b").expect("valid guest row regex")
});

/// Greedy prefix so the last marker wins.
static TITLE_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^.*(?:failed|error):\s*(.*)$").expect("valid title error regex"));

static ERROR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*ERROR:\s*(.+?)\s*$").expect("valid error line regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    Started,
    Completed,
    Warning,
    Error,
    Unknown,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Started => "started",
            BackupStatus::Completed => "completed",
            BackupStatus::Warning => "warning",
            BackupStatus::Error => "error",
            BackupStatus::Unknown => "unknown",
        }
    }

    fn severity(&self) -> Severity {
        match self {
            BackupStatus::Completed => Severity::Success,
            BackupStatus::Warning => Severity::Warning,
            BackupStatus::Error => Severity::Error,
            BackupStatus::Started | BackupStatus::Unknown => Severity::Info,
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            BackupStatus::Started => "🔄",
            BackupStatus::Completed => "✅",
            BackupStatus::Warning => "⚠️",
            BackupStatus::Error => "❌",
            BackupStatus::Unknown => "ℹ️",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BackupStatus::Started => "started",
            BackupStatus::Completed => "completed",
            BackupStatus::Warning => "finished with warnings",
            BackupStatus::Error => "failed",
            BackupStatus::Unknown => "status update",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ok" | "success" | "successful" | "completed" | "finished" | "done" => BackupStatus::Completed,
            "started" | "running" | "start" => BackupStatus::Started,
            "warning" | "warn" => BackupStatus::Warning,
            "error" | "err" | "failed" | "failure" => BackupStatus::Error,
            _ => BackupStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Guest {
    vmid: String,
    name: String,
    ok: bool,
}

impl Guest {
    fn display(&self) -> String {
        format!("{} ({})", self.name, self.vmid)
    }
}

/// Explicit `status`, then an error or warning `severity`, then title keywords.
pub fn infer_status(doc: &Document) -> BackupStatus {
    if let Some(status) = doc.first_str(&["status", "fields.status"]) {
        return BackupStatus::parse(status);
    }
    if let Some(severity) = doc.first_str(&["severity", "fields.severity"]) {
        match severity.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "critical" => return BackupStatus::Error,
            "warning" | "warn" => return BackupStatus::Warning,
            _ => {}
        }
    }
    let title = doc.str_at("title").unwrap_or_default().to_lowercase();
    if title.contains("failed") || title.contains("error") {
        BackupStatus::Error
    } else if title.contains("started") {
        BackupStatus::Started
    } else if title.contains("successful") || title.contains("finished") {
        BackupStatus::Completed
    } else {
        BackupStatus::Unknown
    }
}

/// Text after the last `failed:` or `error:` marker in the title.
fn title_error(title: &str) -> Option<String> {
    let detail = TITLE_ERROR.captures(title)?.get(1)?.as_str().trim();
    (!detail.is_empty()).then(|| detail.to_string())
}

fn guests(doc: &Document, body: &str) -> Vec<Guest> {
    let listed: Vec<Guest> = doc
        .array_at("guests")
        .iter()
        .filter_map(|g| {
            let vmid = g.get("vmid").and_then(crate::document::render_scalar)?;
            let name = g
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(vmid.as_str())
                .to_string();
            let ok = g
                .get("status")
                .and_then(Value::as_str)
                .map(|s| BackupStatus::parse(s) != BackupStatus::Error)
                .unwrap_or(true);
            Some(Guest { vmid, name, ok })
        })
        .collect();
    if !listed.is_empty() {
        return listed;
    }

    GUEST_ROW
        .captures_iter(body)
        .map(|caps| Guest {
            vmid: caps[1].to_string(),
            name: caps[2].to_string(),
            ok: &caps[3] == "ok",
        })
        .collect()
}

pub fn format(doc: &Document, now: DateTime<Utc>) -> Result<CanonicalMessage, FormatError> {
    if !doc.is_object() {
        return Err(FormatError::NotAnObject);
    }

    let status = infer_status(doc);
    let title = doc.str_at("title").unwrap_or("vzdump backup");
    let body = doc.first_str(&["message", "body", "text"]).unwrap_or_default();
    let host = doc
        .first_str(&["fields.hostname", "hostname", "host", "node"])
        .unwrap_or("Proxmox");
    let guests = guests(doc, body);

    let mut errors: Vec<String> = title_error(title).into_iter().collect();
    for caps in ERROR_LINE.captures_iter(body) {
        let line = caps[1].to_string();
        if !errors.contains(&line) {
            errors.push(line);
        }
    }

    let ok: Vec<String> = guests.iter().filter(|g| g.ok).map(Guest::display).collect();
    let failed: Vec<String> = guests.iter().filter(|g| !g.ok).map(Guest::display).collect();

    let headline = format!("{} **Backup {}** on {}", status.icon(), status.label(), host);
    let mut lines = vec![headline];
    match status {
        BackupStatus::Started => {
            if !guests.is_empty() {
                let all: Vec<String> = guests.iter().map(Guest::display).collect();
                lines.push(format!("Guests: {}", summarize_list(&all)));
            }
        }
        BackupStatus::Completed => {
            if !ok.is_empty() {
                lines.push(format!("{} guest(s) backed up: {}", ok.len(), summarize_list(&ok)));
            }
        }
        BackupStatus::Error | BackupStatus::Warning => {
            if !errors.is_empty() {
                lines.push(format!("Error: {}", summarize_list(&errors)));
            }
            if !failed.is_empty() {
                lines.push(format!("Failed guests: {}", summarize_list(&failed)));
            }
            if !ok.is_empty() {
                lines.push(format!("Succeeded: {}", summarize_list(&ok)));
            }
        }
        BackupStatus::Unknown => lines.push(title.to_string()),
    }
    lines.push(format!("_{}_", display_time(doc, now)));

    let mut message = format!("Backup {} on {}", status.label(), host);
    if let Some(first) = errors.first() {
        message.push_str(": ");
        message.push_str(first);
    }

    Ok(CanonicalMessage {
        title: Some(format!("Backup {}", status.label())),
        message: Some(message),
        text: Some(lines.join("\n")),
        severity: Some(status.severity()),
        status: Some(status.as_str().to_string()),
        ..Default::default()
    }
    .with_field("host", host)
    .with_field("guests_ok", ok.len() as u64)
    .with_field("guests_failed", failed.len() as u64))
}
