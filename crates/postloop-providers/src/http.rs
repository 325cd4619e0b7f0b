//! HTTP plumbing shared by the adapters.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::warn;

use crate::error::ProviderError;

const USER_AGENT: &str = concat!("postloop/", env!("CARGO_PKG_VERSION"));
/// Fallback when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_MS: u64 = 5_000;

/// Build the client every adapter uses. Falls back to the default client if
/// the TLS backend cannot be configured with a timeout.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build HTTP client with timeout, using defaults");
            reqwest::Client::new()
        })
}

/// Map a non-success response onto the provider error taxonomy.
pub async fn check_status(resp: Response, provider: &str) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|s| s * 1000)
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry,
        });
    }

    let text = resp.text().await.unwrap_or_default();
    warn!(provider, status = status.as_u16(), body = %text, "provider API error");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::AuthFailed(truncate(&text)));
    }
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        message: truncate(&text),
    })
}

/// Keep error bodies short enough to store in `error_message`.
pub(crate) fn truncate(text: &str) -> String {
    const MAX: usize = 300;
    let text = text.trim();
    if text.chars().count() <= MAX {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("  bad request "), "bad request");
    }

    #[test]
    fn truncate_caps_long_text() {
        let long = "x".repeat(1000);
        let out = truncate(&long);
        assert_eq!(out.chars().count(), 301);
        assert!(out.ends_with('…'));
    }
}
