use postloop_core::ProviderKind;
use thiserror::Error;

/// Errors that can occur within any provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The user has no stored credentials for this provider.
    #[error("{provider} is not configured for this user")]
    NotConfigured { provider: ProviderKind },

    /// Stored credentials are missing a field or are malformed.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The platform rejected the credentials (expired or revoked token).
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The platform refused the content or the request.
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Transport failure. The request URL is stripped since it may hold a token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The item carries nothing this platform can publish.
    #[error("Nothing to publish: {0}")]
    NothingToPublish(String),

    /// The credential store itself failed.
    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.without_url())
    }
}

impl ProviderError {
    /// A response body that did not decode. The URL is dropped like for `Http`.
    pub(crate) fn decode(e: reqwest::Error) -> Self {
        ProviderError::Parse(e.without_url().to_string())
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(e: rusqlite::Error) -> Self {
        ProviderError::Store(e.to_string())
    }
}
