//! Storage appliance notifications: free text with keyword inference.

use chrono::{DateTime, Utc};

use super::{display_time, CanonicalMessage, Severity};
use crate::document::Document;
use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Login,
    Backup,
    Update,
    Storage,
    Notification,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Login => "login",
            Topic::Backup => "backup",
            Topic::Update => "update",
            Topic::Storage => "storage",
            Topic::Notification => "notification",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Topic::Login => "Login",
            Topic::Backup => "Backup",
            Topic::Update => "Update",
            Topic::Storage => "Storage",
            Topic::Notification => "Notification",
        }
    }
}

const ERROR_WORDS: &[&str] = &["error", "failed", "failure", "critical", "crashed", "unable to"];
const WARNING_WORDS: &[&str] = &["warning", "degraded", "abnormal", "insufficient", "low", "full"];

const TOPICS: &[(Topic, &[&str])] = &[
    (Topic::Login, &["signed in", "sign in", "logged in", "login", "log in"]),
    (Topic::Backup, &["backup", "snapshot", "replication"]),
    (Topic::Update, &["update", "upgrade", "new version"]),
    (Topic::Storage, &["volume", "disk", "storage", "raid", "drive", "pool"]),
];

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(at, _)| {
            let before = haystack[..at].chars().next_back();
            let after = haystack[at + needle.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
}

pub fn infer_severity(text: &str) -> Severity {
    let lower = text.to_lowercase();
    if ERROR_WORDS.iter().any(|w| contains_word(&lower, w)) {
        Severity::Error
    } else if WARNING_WORDS.iter().any(|w| contains_word(&lower, w)) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

pub fn infer_topic(text: &str) -> Topic {
    let lower = text.to_lowercase();
    TOPICS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(topic, _)| *topic)
        .unwrap_or(Topic::Notification)
}

fn icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "❌",
        Severity::Warning => "⚠️",
        Severity::Success => "✅",
        Severity::Info => "ℹ️",
    }
}

pub fn format(doc: &Document, now: DateTime<Utc>) -> Result<CanonicalMessage, FormatError> {
    let text = doc
        .first_str(&["text", "message", "title"])
        .ok_or(FormatError::MissingField("text"))?;
    let severity = infer_severity(text);
    let topic = infer_topic(text);
    let title = format!("Synology {}", topic.label());

    let mut message = CanonicalMessage {
        text: Some(format!(
            "{} **{title}**\n{text}\n_{}_",
            icon(severity),
            display_time(doc, now)
        )),
        message: Some(text.to_string()),
        title: Some(title),
        severity: Some(severity),
        ..Default::default()
    }
    .with_field("topic", topic.as_str());
    if let Some(host) = doc.first_str(&["hostname", "host", "server"]) {
        message = message.with_field("host", host);
    }
    Ok(message)
}
