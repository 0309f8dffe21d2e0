//! Request body / query normalization.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Text,
    Unknown,
}

fn body_kind(content_type: Option<&str>) -> BodyKind {
    let Some(content_type) = content_type else {
        return BodyKind::Unknown;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/json" || mime.ends_with("+json") {
        BodyKind::Json
    } else if mime == "application/x-www-form-urlencoded" {
        BodyKind::Form
    } else if mime.starts_with("text/") {
        BodyKind::Text
    } else {
        BodyKind::Unknown
    }
}

/// Turn a raw inbound request into a [`Document`]. Never fails: anything
/// unparseable is wrapped as `{ "text": <body> }`.
///
/// A non-empty body always wins over the query string.
pub fn extract(content_type: Option<&str>, body: &[u8], query: Option<&str>, now: DateTime<Utc>) -> Document {
    let raw = String::from_utf8_lossy(body);

    if raw.trim().is_empty() {
        if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
            return Document::new(Value::Object(parse_form(query)));
        }
        let mut map = Map::new();
        map.insert("text".to_string(), Value::String("Empty payload".to_string()));
        map.insert("timestamp".to_string(), Value::String(now.to_rfc3339()));
        return Document::new(Value::Object(map));
    }

    match body_kind(content_type) {
        BodyKind::Json => {
            let trimmed = raw.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                parse_json_or_text(&raw)
            } else {
                tracing::debug!("json content-type without json body, wrapping as text");
                Document::text(raw.into_owned())
            }
        }
        BodyKind::Form => Document::new(Value::Object(parse_form(&raw))),
        BodyKind::Text => Document::text(raw.into_owned()),
        BodyKind::Unknown => parse_json_or_text(&raw),
    }
}

fn parse_json_or_text(raw: &str) -> Document {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Document::new(value),
        Err(err) => {
            tracing::debug!(error = %err, "payload is not json, wrapping as text");
            Document::text(raw.to_string())
        }
    }
}

fn parse_form(raw: &str) -> Map<String, Value> {
    url::form_urlencoded::parse(raw.trim_start_matches('?').as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn json_body_is_parsed() {
        let doc = extract(Some("application/json; charset=utf-8"), br#"{"a":1}"#, None, now());
        assert_eq!(doc.as_value(), &json!({"a": 1}));
    }

    #[test]
    fn broken_json_is_wrapped_as_text() {
        let doc = extract(Some("application/json"), b"{not json", None, now());
        assert_eq!(doc.as_value(), &json!({"text": "{not json"}));
    }

    #[test]
    fn form_body_becomes_a_map() {
        let doc = extract(
            Some("application/x-www-form-urlencoded"),
            b"title=Backup+done&severity=info",
            None,
            now(),
        );
        assert_eq!(doc.as_value(), &json!({"title": "Backup done", "severity": "info"}));
    }

    #[test]
    fn plain_text_is_wrapped() {
        let doc = extract(Some("text/plain"), b"{\"looks\":\"like json\"}", None, now());
        assert_eq!(doc.str_at("text"), Some("{\"looks\":\"like json\"}"));
    }

    #[test]
    fn unknown_content_type_tries_json_first() {
        let doc = extract(None, b"[1,2]", None, now());
        assert_eq!(doc.as_value(), &json!([1, 2]));
        let doc = extract(Some("application/octet-stream"), b"hello", None, now());
        assert_eq!(doc.as_value(), &json!({"text": "hello"}));
    }

    #[test]
    fn query_is_used_only_without_body() {
        let doc = extract(None, b"", Some("event=ping&x=1"), now());
        assert_eq!(doc.as_value(), &json!({"event": "ping", "x": "1"}));

        let doc = extract(Some("text/plain"), b"body", Some("event=ping"), now());
        assert_eq!(doc.as_value(), &json!({"text": "body"}));
    }

    #[test]
    fn empty_request_gets_synthetic_document() {
        let doc = extract(None, b"", None, now());
        assert_eq!(
            doc.as_value(),
            &json!({"text": "Empty payload", "timestamp": "2024-05-01T12:00:00+00:00"})
        );
    }
}
