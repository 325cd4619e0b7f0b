use postloop_providers::ProviderError;
use thiserror::Error;

use crate::types::EntryStatus;

/// Errors that can occur within the scheduling core.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Post not found: {id}")]
    PostNotFound { id: String },

    #[error("Dispatch entry not found: {id}")]
    EntryNotFound { id: String },

    /// A status change the entry lifecycle does not allow.
    #[error("Entry {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: String,
        status: EntryStatus,
        action: &'static str,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
