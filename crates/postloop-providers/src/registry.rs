use std::collections::BTreeMap;
use std::sync::Arc;

use postloop_core::{ContentItem, ProviderKind, UserId};
use tracing::{debug, info};

use crate::{
    credentials::CredentialStore,
    error::ProviderError,
    provider::Provider,
    types::Receipt,
};

/// Registered provider adapters plus the credential store that feeds them.
///
/// Providers are keyed by [`Provider::kind`] and always iterated in
/// [`ProviderKind`] order so dispatch attempts are deterministic.
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn Provider>>,
    credentials: Arc<dyn CredentialStore>,
}

impl ProviderRegistry {
    /// Create a registry with no adapters.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            providers: BTreeMap::new(),
            credentials,
        }
    }

    /// Register an adapter, replacing any previous adapter of the same kind.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let kind = provider.kind();
        info!(provider = %kind, "registering provider adapter");
        self.providers.insert(kind, provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    /// Providers that are both registered here and configured for `user`.
    pub fn configured_for(&self, user: &UserId) -> Result<Vec<ProviderKind>, ProviderError> {
        let configured = self.credentials.configured_providers(user)?;
        let kinds: Vec<ProviderKind> = self
            .providers
            .keys()
            .filter(|k| configured.contains(k))
            .copied()
            .collect();
        debug!(user_id = %user, providers = ?kinds, "resolved configured providers");
        Ok(kinds)
    }

    /// Publish `item` through one provider using `user`'s credentials.
    pub async fn publish(
        &self,
        kind: ProviderKind,
        user: &UserId,
        item: &ContentItem,
    ) -> Result<Receipt, ProviderError> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or(ProviderError::NotConfigured { provider: kind })?;
        let credentials = self
            .credentials
            .credentials(user, kind)?
            .ok_or(ProviderError::NotConfigured { provider: kind })?;
        provider.publish(item, &credentials).await
    }
}
