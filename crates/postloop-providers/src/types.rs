use std::collections::BTreeMap;

use postloop_core::ProviderKind;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Secret material for one (user, provider) pair, stored as a flat JSON object.
///
/// `Debug` is implemented by hand so tokens never end up in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Return a non-empty field or an [`ProviderError::InvalidCredentials`].
    pub fn require(&self, key: &str) -> Result<&str, ProviderError> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidCredentials(format!("missing `{key}`")))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// Proof of a successful publish, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub provider: ProviderKind,
    /// Platform-native id of the created message or status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Receipt {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            remote_id: None,
            url: None,
        }
    }
}
