use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use postloop_core::{ProviderKind, UserId};
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use crate::{error::ProviderError, types::Credentials};

/// Read access to per-user provider secrets.
///
/// Only the [`ProviderRegistry`](crate::registry::ProviderRegistry) calls
/// [`CredentialStore::credentials`]; the scheduling core only ever sees the
/// set of configured provider kinds.
pub trait CredentialStore: Send + Sync {
    /// Providers for which `user` has stored credentials.
    fn configured_providers(&self, user: &UserId) -> Result<BTreeSet<ProviderKind>, ProviderError>;

    /// Secret material for one provider, if configured.
    fn credentials(
        &self,
        user: &UserId,
        kind: ProviderKind,
    ) -> Result<Option<Credentials>, ProviderError>;
}

/// Create the `provider_credentials` table. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS provider_credentials (
            user_id     TEXT NOT NULL,
            provider    TEXT NOT NULL,
            secret      TEXT NOT NULL,   -- JSON object of string fields
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, provider)
        ) STRICT;",
    )
}

/// SQLite-backed credential store sharing the scheduler's database file.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    pub fn new(conn: Connection) -> Result<Self, ProviderError> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store or replace the credentials for (user, provider).
    pub fn set(
        &self,
        user: &UserId,
        kind: ProviderKind,
        credentials: &Credentials,
    ) -> Result<(), ProviderError> {
        let secret = serde_json::to_string(credentials)
            .map_err(|e| ProviderError::InvalidCredentials(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.db().execute(
            "INSERT INTO provider_credentials (user_id, provider, secret, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, provider) DO UPDATE
             SET secret = excluded.secret, updated_at = excluded.updated_at",
            rusqlite::params![user.as_str(), kind.as_str(), secret, now],
        )?;
        info!(user_id = %user, provider = %kind, "provider credentials stored");
        Ok(())
    }

    /// Remove the credentials for (user, provider). Returns whether a row existed.
    pub fn remove(&self, user: &UserId, kind: ProviderKind) -> Result<bool, ProviderError> {
        let n = self.db().execute(
            "DELETE FROM provider_credentials WHERE user_id = ?1 AND provider = ?2",
            rusqlite::params![user.as_str(), kind.as_str()],
        )?;
        Ok(n > 0)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn configured_providers(&self, user: &UserId) -> Result<BTreeSet<ProviderKind>, ProviderError> {
        let db = self.db();
        let mut stmt =
            db.prepare_cached("SELECT provider FROM provider_credentials WHERE user_id = ?1")?;
        let names: Vec<String> = stmt
            .query_map([user.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut kinds = BTreeSet::new();
        for name in names {
            match name.parse::<ProviderKind>() {
                Ok(kind) => {
                    kinds.insert(kind);
                }
                Err(e) => warn!(user_id = %user, "ignoring stored credentials: {e}"),
            }
        }
        Ok(kinds)
    }

    fn credentials(
        &self,
        user: &UserId,
        kind: ProviderKind,
    ) -> Result<Option<Credentials>, ProviderError> {
        let secret: Option<String> = self
            .db()
            .query_row(
                "SELECT secret FROM provider_credentials WHERE user_id = ?1 AND provider = ?2",
                rusqlite::params![user.as_str(), kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        secret
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| ProviderError::InvalidCredentials(e.to_string()))
            })
            .transpose()
    }
}
