use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthFailure;
use crate::types::{Headers, Source};

type HmacSha256 = Hmac<Sha256>;

/// Legacy body-signature headers, checked in this order.
pub const SIGNATURE_HEADERS: [&str; 3] = [
    "x-hub-signature-256",
    "x-signature-256",
    "x-webhook-signature",
];

/// Compute the hex HMAC-SHA256 of `payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature, tolerating a `sha256=` prefix.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = compute_signature(secret, payload);
    constant_time_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes())
}

/// Length-checked constant-time comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub header: &'static str,
    pub value: String,
}

/// First legacy signature header present on the request.
pub fn parse_signature_header(headers: &Headers) -> Option<ParsedSignature> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        headers.get(name).map(|value| ParsedSignature {
            header: *name,
            value: value.to_string(),
        })
    })
}

/// Checks the per-source shared secret and the optional legacy body signature.
#[derive(Debug, Clone, Default)]
pub struct SignatureValidator {
    fallback_secret: Option<String>,
}

impl SignatureValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide key for legacy signatures when a source has no secret.
    pub fn with_fallback_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.fallback_secret = (!secret.is_empty()).then_some(secret);
        self
    }

    pub fn validate(&self, source: &Source, headers: &Headers, body: &[u8]) -> Result<(), AuthFailure> {
        let result = self
            .check_shared_secret(source, headers)
            .and_then(|_| self.check_legacy_signature(source, headers, body));

        match &result {
            Ok(()) => tracing::debug!(source_id = %source.id, kind = %source.kind, "webhook authentication passed"),
            Err(failure) => tracing::warn!(source_id = %source.id, kind = %source.kind, %failure, "webhook authentication failed"),
        }
        result
    }

    fn check_shared_secret(&self, source: &Source, headers: &Headers) -> Result<(), AuthFailure> {
        let Some(expected) = source.secret.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(());
        };

        let header = source.kind.secret_header();
        let provided = headers
            .get(header)
            .ok_or(AuthFailure::MissingSecret { header })?;

        if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthFailure::SecretMismatch)
        }
    }

    /// An absent signature header is accepted. So is a present one when there
    /// is no key to check it with.
    fn check_legacy_signature(&self, source: &Source, headers: &Headers, body: &[u8]) -> Result<(), AuthFailure> {
        let Some(parsed) = parse_signature_header(headers) else {
            return Ok(());
        };

        let key = source
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.fallback_secret.as_deref());

        let Some(key) = key else {
            tracing::warn!(
                source_id = %source.id,
                header = parsed.header,
                "signature header present but no key configured, skipping"
            );
            return Ok(());
        };

        if verify_signature(key.as_bytes(), body, &parsed.value) {
            Ok(())
        } else {
            Err(AuthFailure::SignatureMismatch { header: parsed.header })
        }
    }
}
