use async_trait::async_trait;
use postloop_core::{ContentItem, ProviderKind};

use crate::{
    error::ProviderError,
    types::{Credentials, Receipt},
};

/// Common interface implemented by every publishing adapter.
///
/// Implementations must be `Send + Sync` so one adapter instance can be shared
/// by every dispatch invocation. Adapters hold no per-user state: credentials
/// are passed in on each call by the [`ProviderRegistry`](crate::registry::ProviderRegistry).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Platform this adapter publishes to. Unique within a registry.
    fn kind(&self) -> ProviderKind;

    /// Publish a single content item.
    ///
    /// Each call is independent; a failure here never affects other providers
    /// attempted for the same entry.
    async fn publish(
        &self,
        item: &ContentItem,
        credentials: &Credentials,
    ) -> Result<Receipt, ProviderError>;
}
