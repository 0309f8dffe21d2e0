//! Vendor payload formatting.
//!
//! A formatter is a pure function from a [`Document`] to a destination-agnostic
//! [`CanonicalMessage`]. Each source kind with its own heuristics lives in a
//! submodule; everything else goes through [`generic`]. A formatter that fails,
//! or produces nothing displayable, is replaced by the generic default message.

pub mod appliance;
pub mod backup;
pub mod ci;
pub mod container;
pub mod generic;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::FormatError;
use crate::types::SourceKind;

/// Number of list items shown before collapsing into "+N more".
pub const LIST_PREVIEW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// RGB color used by embed, card and attachment renderers.
    pub fn color(&self) -> u32 {
        match self {
            Severity::Info => 0x3498db,
            Severity::Success => 0x2ecc71,
            Severity::Warning => 0xf39c12,
            Severity::Error => 0xe74c3c,
        }
    }

    pub fn hex_color(&self) -> String {
        format!("#{:06x}", self.color())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    #[serde(default)]
    pub short: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
}

/// Formatter output, independent of any destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Identifying fields (project, branch, host, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CanonicalMessage {
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Something a destination can show: text, message, title or attachments.
    pub fn is_usable(&self) -> bool {
        let non_blank = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        non_blank(&self.text)
            || non_blank(&self.message)
            || non_blank(&self.title)
            || self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Inputs a formatter may use besides the document.
#[derive(Debug, Clone, Copy)]
pub struct FormatContext<'a> {
    pub kind: SourceKind,
    pub event_type: &'a str,
    /// Route-level template, honoured by the generic formatter.
    pub template: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Format `doc` for `ctx.kind`, substituting the generic default on failure.
pub fn format_message(ctx: &FormatContext<'_>, doc: &Document) -> CanonicalMessage {
    let result: Result<CanonicalMessage, FormatError> = match ctx.kind {
        SourceKind::Proxmox => backup::format(doc, ctx.now),
        SourceKind::Gitlab => ci::format(doc, ctx.event_type),
        SourceKind::Synology => appliance::format(doc, ctx.now),
        SourceKind::Watchtower => container::format(doc),
        SourceKind::Arr | SourceKind::UptimeKuma | SourceKind::Generic => {
            Ok(generic::format(doc, ctx.event_type, ctx.template, ctx.now))
        }
    };

    match result {
        Ok(message) if message.is_usable() => message,
        Ok(_) => {
            tracing::warn!(kind = %ctx.kind, event_type = ctx.event_type, "formatter produced an empty message, using default");
            generic::default_message(doc, ctx.event_type)
        }
        Err(err) => {
            tracing::warn!(kind = %ctx.kind, event_type = ctx.event_type, error = %err, "formatter failed, using default");
            generic::default_message(doc, ctx.event_type)
        }
    }
}

/// `a, b, c, d, e +2 more`
pub fn summarize_list(items: &[String]) -> String {
    let shown = items
        .iter()
        .take(LIST_PREVIEW)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > LIST_PREVIEW {
        format!("{shown} +{} more", items.len() - LIST_PREVIEW)
    } else {
        shown
    }
}

/// Human timestamp: the document's own if present, else `now`.
pub(crate) fn display_time(doc: &Document, now: DateTime<Utc>) -> String {
    if let Some(ts) = doc.i64_at("timestamp") {
        if let Some(parsed) = DateTime::<Utc>::from_timestamp(ts, 0) {
            return parsed.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        }
    }
    if let Some(ts) = doc.str_at("timestamp") {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
            return parsed.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC").to_string();
        }
        return ts.to_string();
    }
    now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lists_collapse_after_five_items() {
        let items: Vec<String> = (1..=7).map(|i| format!("vm{i}")).collect();
        assert_eq!(summarize_list(&items), "vm1, vm2, vm3, vm4, vm5 +2 more");
        assert_eq!(summarize_list(&items[..2]), "vm1, vm2");
    }

    #[test]
    fn unusable_output_falls_back_to_default() {
        // Synology payload without any text field makes its formatter fail.
        let doc = Document::new(json!({"foo": "bar"}));
        let ctx = FormatContext {
            kind: SourceKind::Synology,
            event_type: "notification",
            template: None,
            now: Utc::now(),
        };
        let message = format_message(&ctx, &doc);
        assert_eq!(message.title.as_deref(), Some("Event: notification"));
        assert!(message.text.unwrap().starts_with("Event: notification\n"));
    }

    #[test]
    fn canonical_fields_flatten_on_the_wire() {
        let message = CanonicalMessage {
            title: Some("t".into()),
            severity: Some(Severity::Warning),
            ..Default::default()
        }
        .with_field("project", "Demo");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"title": "t", "severity": "warning", "project": "Demo"})
        );
    }
}
