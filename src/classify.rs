//! Event-type derivation.
//!
//! Each source kind probes a fixed, ordered list of fields; the first one
//! present wins. The result is never empty.

use crate::document::Document;
use crate::format::container::{self, UpdaterMessage};
use crate::format::appliance;
use crate::types::SourceKind;

pub fn classify(kind: SourceKind, doc: &Document) -> String {
    let event_type = match kind {
        SourceKind::Gitlab => doc
            .first_scalar(&["object_kind", "event_name", "event_type"])
            .unwrap_or_else(|| "gitlab_event".to_string()),
        SourceKind::Proxmox => classify_proxmox(doc),
        SourceKind::Synology => classify_synology(doc),
        SourceKind::Watchtower => classify_watchtower(doc),
        SourceKind::Arr => doc
            .first_scalar(&["eventType", "event_type"])
            .unwrap_or_else(|| "arr_event".to_string()),
        SourceKind::UptimeKuma => classify_uptime(doc),
        SourceKind::Generic => doc
            .first_scalar(&["event_type", "eventType", "type", "event", "action"])
            .unwrap_or_else(|| "generic_event".to_string()),
    };
    tracing::debug!(kind = %kind, event_type = %event_type, "event classified");
    event_type
}

fn classify_proxmox(doc: &Document) -> String {
    if let Some(found) = doc.first_scalar(&["type", "fields.type", "event"]) {
        return found;
    }
    let title = doc.str_at("title").unwrap_or_default().to_lowercase();
    if title.contains("vzdump") || title.contains("backup") {
        return "backup".to_string();
    }
    "proxmox_event".to_string()
}

fn classify_synology(doc: &Document) -> String {
    if let Some(found) = doc.first_scalar(&["event_type", "event"]) {
        return found;
    }
    match doc.first_str(&["text", "message", "title"]) {
        Some(text) => appliance::infer_topic(text).as_str().to_string(),
        None => "notification".to_string(),
    }
}

fn classify_watchtower(doc: &Document) -> String {
    if let Some(found) = doc.scalar_at("type") {
        return found;
    }
    let text = doc.first_str(&["message", "text", "title"]).unwrap_or_default();
    match container::classify_message(text) {
        UpdaterMessage::Startup => "startup",
        UpdaterMessage::Update => "update",
        UpdaterMessage::Error => "error",
        UpdaterMessage::Generic => "notification",
    }
    .to_string()
}

fn classify_uptime(doc: &Document) -> String {
    if doc.has("heartbeat.status") {
        return match doc.i64_at("heartbeat.status") {
            Some(1) => "monitor_up",
            Some(0) => "monitor_down",
            _ => "monitor_pending",
        }
        .to_string();
    }
    if doc.has("monitor") {
        return "monitor_event".to_string();
    }
    if doc.has("msg") {
        return "notification".to_string();
    }
    "uptime_event".to_string()
}
