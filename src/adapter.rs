//! Destination wire envelopes.
//!
//! Precedence: structured attachments, then pre-formatted text, then a
//! kind-specific envelope built from `message`/`title`.

use serde_json::{json, Map, Value};

use crate::format::{Attachment, CanonicalMessage, Severity};
use crate::types::TargetKind;

/// Newline, markdown bold, or any emoji.
pub fn is_preformatted(text: &str) -> bool {
    text.contains('\n') || text.contains("**") || text.chars().any(is_emoji)
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2300..=0x23FF | 0x2B00..=0x2BFF | 0x1F1E6..=0x1F1FF
    )
}

pub fn adapt(kind: TargetKind, message: &CanonicalMessage) -> Value {
    if let Some(attachments) = message.attachments.as_deref().filter(|a| !a.is_empty()) {
        if kind.supports_attachments() {
            return attachment_envelope(kind, message, attachments);
        }
        return text_envelope(kind, flatten_attachments(message, attachments));
    }

    if let Some(text) = message.text.as_deref().filter(|t| is_preformatted(t)) {
        return match kind {
            TargetKind::Webhook => canonical(message),
            _ => text_envelope(kind, text.to_string()),
        };
    }

    let text = derived_text(message);
    match kind {
        TargetKind::Slack | TargetKind::Mattermost | TargetKind::Rocketchat => json!({ "text": text }),
        TargetKind::Discord => discord_embed(message, text),
        TargetKind::Teams => message_card(message, text),
        TargetKind::Webhook => canonical(message),
    }
}

fn derived_text(message: &CanonicalMessage) -> String {
    [&message.message, &message.title, &message.text]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Plain text body in the field each kind reads.
fn text_envelope(kind: TargetKind, text: String) -> Value {
    match kind {
        TargetKind::Discord => json!({ "content": text }),
        _ => json!({ "text": text }),
    }
}

fn canonical(message: &CanonicalMessage) -> Value {
    match serde_json::to_value(message) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "canonical message not serializable, sending text only");
            json!({ "text": derived_text(message) })
        }
    }
}

fn attachment_envelope(kind: TargetKind, message: &CanonicalMessage, attachments: &[Attachment]) -> Value {
    if kind == TargetKind::Webhook {
        return canonical(message);
    }
    let mut envelope = Map::new();
    let text = message.text.clone().unwrap_or_else(|| derived_text(message));
    envelope.insert("text".to_string(), Value::String(text));
    envelope.insert("attachments".to_string(), json!(attachments));
    Value::Object(envelope)
}

fn flatten_attachments(message: &CanonicalMessage, attachments: &[Attachment]) -> String {
    let mut lines = Vec::new();
    let lead = message.text.clone().unwrap_or_else(|| derived_text(message));
    if !lead.is_empty() {
        lines.push(lead);
    }
    for attachment in attachments {
        if let Some(title) = &attachment.title {
            lines.push(format!("**{title}**"));
        }
        if let Some(text) = &attachment.text {
            lines.push(text.clone());
        }
        for field in &attachment.fields {
            lines.push(format!("{}: {}", field.title, field.value));
        }
    }
    lines.join("\n")
}

fn discord_embed(message: &CanonicalMessage, text: String) -> Value {
    let severity = message.severity.unwrap_or(Severity::Info);
    let title = message.title.clone().unwrap_or_else(|| text.clone());
    let description = message
        .message
        .clone()
        .or_else(|| message.text.clone())
        .unwrap_or_default();
    json!({
        "content": text,
        "embeds": [{
            "title": title,
            "description": description,
            "color": severity.color(),
        }]
    })
}

fn message_card(message: &CanonicalMessage, text: String) -> Value {
    let severity = message.severity.unwrap_or(Severity::Info);
    let facts: Vec<Value> = message
        .fields
        .iter()
        .filter_map(|(name, value)| {
            crate::document::render_scalar(value).map(|v| json!({ "name": name, "value": v }))
        })
        .collect();

    let mut card = json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "themeColor": format!("{:06X}", severity.color()),
        "summary": text,
        "title": message.title.clone().unwrap_or_else(|| text.clone()),
        "text": text,
    });
    if !facts.is_empty() {
        card["sections"] = json!([{ "facts": facts }]);
    }
    card
}
