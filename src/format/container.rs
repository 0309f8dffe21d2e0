//! Container update agent reports.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{summarize_list, Attachment, AttachmentField, CanonicalMessage, Severity};
use crate::document::Document;
use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterMessage {
    Startup,
    Update,
    Error,
    Generic,
}

const STARTUP_WORDS: &[&str] = &[
    "scheduling first run",
    "starting watchtower",
    "using no notifications",
    "using notifications",
];
const UPDATE_WORDS: &[&str] = &["found new", "creating /", "updated to", "stopping /"];
const ERROR_WORDS: &[&str] = &["error", "failed", "unable to", "could not"];

static FOUND_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)found new (\S+) image").expect("valid image regex"));

static CREATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)creating /([A-Za-z0-9_.\-]+)").expect("valid creating regex"));

static UPDATED_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/?([A-Za-z0-9_.\-]+)\s+(?:has been\s+)?updated to\s+(\S+)").expect("valid updated regex")
});

static FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:failed|unable to|could not|error)\b").expect("valid failure regex"));

static CONTAINER_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([A-Za-z0-9_.\-]+)").expect("valid container regex"));

/// Startup, then update, then error keywords; anything else is generic.
pub fn classify_message(text: &str) -> UpdaterMessage {
    let lower = text.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if any(STARTUP_WORDS) {
        UpdaterMessage::Startup
    } else if any(UPDATE_WORDS) {
        UpdaterMessage::Update
    } else if any(ERROR_WORDS) {
        UpdaterMessage::Error
    } else {
        UpdaterMessage::Generic
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub images: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Line-by-line scan of an update report.
pub fn parse_report(text: &str) -> UpdateReport {
    let mut report = UpdateReport::default();
    for line in text.lines() {
        if let Some(caps) = FOUND_IMAGE.captures(line) {
            push_unique(&mut report.images, caps[1].to_string());
        }
        if FAILED.is_match(line) {
            let name = CONTAINER_REF
                .captures(line)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| line.trim().to_string());
            push_unique(&mut report.failed, name);
            continue;
        }
        if let Some(caps) = CREATED.captures(line) {
            push_unique(&mut report.updated, caps[1].to_string());
        } else if let Some(caps) = UPDATED_TO.captures(line) {
            push_unique(&mut report.updated, caps[1].to_string());
        }
    }
    report.updated.retain(|name| !report.failed.contains(name));
    report
}

pub fn format(doc: &Document) -> Result<CanonicalMessage, FormatError> {
    let text = doc
        .first_str(&["message", "text", "title"])
        .ok_or(FormatError::MissingField("message"))?;
    let host = doc.first_str(&["hostname", "host"]);
    let first_line = text.lines().next().unwrap_or_default().trim().to_string();

    let message = match classify_message(text) {
        UpdaterMessage::Startup => CanonicalMessage {
            title: Some("Watchtower started".to_string()),
            message: Some(first_line),
            text: Some(format!("🚀 **Watchtower started**\n{text}")),
            severity: Some(Severity::Info),
            status: Some("startup".to_string()),
            ..Default::default()
        },
        UpdaterMessage::Update => update_message(&parse_report(text)),
        UpdaterMessage::Error => CanonicalMessage {
            title: Some("Watchtower error".to_string()),
            message: Some(first_line),
            text: Some(text.to_string()),
            severity: Some(Severity::Error),
            status: Some("error".to_string()),
            ..Default::default()
        },
        UpdaterMessage::Generic => CanonicalMessage {
            title: Some("Watchtower".to_string()),
            message: Some(first_line),
            text: Some(text.to_string()),
            severity: Some(Severity::Info),
            ..Default::default()
        },
    };

    Ok(match host {
        Some(host) => message.with_field("host", host),
        None => message,
    })
}

fn update_message(report: &UpdateReport) -> CanonicalMessage {
    let severity = match (report.updated.is_empty(), report.failed.is_empty()) {
        (_, true) => Severity::Success,
        (false, false) => Severity::Warning,
        (true, false) => Severity::Error,
    };
    let summary = format!(
        "🐳 **Container updates**: {} updated, {} failed",
        report.updated.len(),
        report.failed.len()
    );

    let mut counts = vec![
        AttachmentField {
            title: "Updated".to_string(),
            value: report.updated.len().to_string(),
            short: true,
        },
        AttachmentField {
            title: "Failed".to_string(),
            value: report.failed.len().to_string(),
            short: true,
        },
    ];
    if !report.images.is_empty() {
        counts.push(AttachmentField {
            title: "Images".to_string(),
            value: summarize_list(&report.images),
            short: false,
        });
    }

    let mut attachments = vec![Attachment {
        title: Some("Updated containers".to_string()),
        text: Some(if report.updated.is_empty() {
            "none".to_string()
        } else {
            summarize_list(&report.updated)
        }),
        color: Some(severity.hex_color()),
        fields: counts,
    }];
    if !report.failed.is_empty() {
        attachments.push(Attachment {
            title: Some("Failed containers".to_string()),
            text: Some(summarize_list(&report.failed)),
            color: Some(Severity::Error.hex_color()),
            fields: Vec::new(),
        });
    }

    CanonicalMessage {
        title: Some("Container updates".to_string()),
        message: Some(format!(
            "{} container(s) updated, {} failed",
            report.updated.len(),
            report.failed.len()
        )),
        text: Some(summary),
        severity: Some(severity),
        status: Some("update".to_string()),
        attachments: Some(attachments),
        ..Default::default()
    }
    .with_field("updated", report.updated.len() as u64)
    .with_field("failed", report.failed.len() as u64)
}
