//! `postloop-core` — types, configuration and errors shared by every postloop crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::PostloopConfig;
pub use error::{CoreError, Result};
pub use types::{ContentItem, MediaAsset, ProviderKind, UserId};
