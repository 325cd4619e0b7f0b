//! `postloop-providers` — publishing adapters for external platforms.
//!
//! Each platform implements [`Provider`]. The [`ProviderRegistry`] pairs the
//! registered adapters with a [`CredentialStore`] so callers never touch
//! secret material: they ask which providers a user has configured and then
//! publish through the registry.

pub mod credentials;
pub mod discord;
pub mod error;
pub mod http;
pub mod mastodon;
pub mod provider;
pub mod registry;
pub mod telegram;
pub mod types;

pub use credentials::{CredentialStore, SqliteCredentialStore};
pub use error::ProviderError;
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use types::{Credentials, Receipt};
