use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of the tenant that owns schedules, posts and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        // UUIDv7 is time-sortable, which keeps per-user log lines easy to correlate
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// External publishing platform reachable through a dedicated adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Telegram,
    Mastodon,
    Discord,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Telegram,
        ProviderKind::Mastodon,
        ProviderKind::Discord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Telegram => "telegram",
            ProviderKind::Mastodon => "mastodon",
            ProviderKind::Discord => "discord",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(ProviderKind::Telegram),
            "mastodon" => Ok(ProviderKind::Mastodon),
            "discord" => Ok(ProviderKind::Discord),
            other => Err(CoreError::UnknownProvider(other.to_string())),
        }
    }
}

/// One media file attached to a post.
///
/// Uploading is handled elsewhere; an asset only becomes deliverable once
/// the upload has produced a public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

impl MediaAsset {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            alt_text: None,
        }
    }

    pub fn is_deliverable(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// A content item ("post") from the user's library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub user_id: UserId,
    /// Default text used when no provider-specific payload exists.
    #[serde(default)]
    pub caption: Option<String>,
    /// Ordered media assets; the first deliverable one is published.
    #[serde(default)]
    pub assets: Vec<MediaAsset>,
    /// Per-provider text overrides.
    #[serde(default)]
    pub texts: BTreeMap<ProviderKind, String>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn has_deliverable_asset(&self) -> bool {
        self.assets.iter().any(MediaAsset::is_deliverable)
    }

    pub fn primary_asset(&self) -> Option<&MediaAsset> {
        self.assets.iter().find(|a| a.is_deliverable())
    }

    /// Text for `kind`, falling back to the default caption.
    pub fn text_for(&self, kind: ProviderKind) -> Option<&str> {
        self.texts
            .get(&kind)
            .map(String::as_str)
            .or(self.caption.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}
