//! Route templates and the default message.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use super::{CanonicalMessage, Severity};
use crate::document::{render_scalar, Document};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder regex"));

/// Substitute `{{eventType}}`, `{{timestamp}}` and `{{dotted.path}}`
/// placeholders. Anything unresolved renders as an empty string.
pub fn render_template(template: &str, doc: &Document, event_type: &str, now: DateTime<Utc>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "eventType" => event_type.to_string(),
            "timestamp" => now.to_rfc3339(),
            path => match doc.get(path) {
                Some(value @ (Value::Array(_) | Value::Object(_))) => value.to_string(),
                Some(value) => render_scalar(value).unwrap_or_default(),
                None => String::new(),
            },
        })
        .into_owned()
}

/// Templated message when the route has a template, default message otherwise.
pub fn format(doc: &Document, event_type: &str, template: Option<&str>, now: DateTime<Utc>) -> CanonicalMessage {
    match template.filter(|t| !t.trim().is_empty()) {
        Some(template) => CanonicalMessage {
            text: Some(render_template(template, doc, event_type, now)),
            severity: doc.str_at("severity").and_then(parse_severity),
            ..Default::default()
        },
        None => default_message(doc, event_type),
    }
}

/// `Event: <eventType>` followed by the raw document.
pub fn default_message(doc: &Document, event_type: &str) -> CanonicalMessage {
    let title = format!("Event: {event_type}");
    CanonicalMessage {
        text: Some(format!("{title}\n{}", doc.to_pretty_string())),
        title: Some(title),
        severity: Some(Severity::Info),
        ..Default::default()
    }
    .with_field("payload", doc.as_value().clone())
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "info" | "information" => Some(Severity::Info),
        "success" | "ok" => Some(Severity::Success),
        "warning" | "warn" => Some(Severity::Warning),
        "error" | "critical" | "fatal" => Some(Severity::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholders_resolve_against_the_document() {
        let doc = Document::new(json!({"a": {"b": "X"}}));
        let text = render_template("{{eventType}}: {{a.b}}", &doc, "generic_event", Utc::now());
        assert_eq!(text, "generic_event: X");
    }

    #[test]
    fn unresolved_placeholders_render_empty() {
        let doc = Document::new(json!({"a": {"b": "X"}}));
        let text = render_template("{{eventType}}: {{a.b}} [{{ missing.path }}]", &doc, "generic_event", Utc::now());
        assert_eq!(text, "generic_event: X []");
    }

    #[test]
    fn timestamps_and_containers() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let doc = Document::new(json!({"tags": ["a", "b"], "n": 3}));
        let text = render_template("{{timestamp}} {{tags}} {{n}}", &doc, "x", now);
        assert_eq!(text, r#"2024-05-01T12:00:00+00:00 ["a","b"] 3"#);
    }

    #[test]
    fn no_template_gives_default_message() {
        let doc = Document::new(json!({"k": "v"}));
        let message = format(&doc, "ping", Some("  "), Utc::now());
        assert_eq!(message.title.as_deref(), Some("Event: ping"));
        assert_eq!(message.text.as_deref(), Some("Event: ping\n{\n  \"k\": \"v\"\n}"));
        assert_eq!(message.fields["payload"], json!({"k": "v"}));
    }
}
