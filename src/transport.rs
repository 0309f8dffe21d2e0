use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FailureReason;

/// Per-attempt timeout for outbound calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// `User-Agent` sent with every outbound call.
pub const DEFAULT_USER_AGENT: &str = concat!("webhook-relay/", env!("CARGO_PKG_VERSION"));

/// A single outbound POST. Only 2xx responses are `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<(), FailureReason>;
}

/// reqwest-backed transport.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<(), FailureReason> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                Err(FailureReason::Http {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                })
            }
            Err(err) if err.is_timeout() => Err(FailureReason::Timeout(format!(
                "request timed out after {}s",
                self.timeout.as_secs()
            ))),
            Err(err) => Err(FailureReason::Network(err.to_string())),
        }
    }
}
