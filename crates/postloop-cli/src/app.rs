use std::sync::Arc;
use std::time::Duration;

use postloop_core::PostloopConfig;
use postloop_providers::{
    discord::DiscordProvider, mastodon::MastodonProvider, telegram::TelegramProvider,
    ProviderRegistry, SqliteCredentialStore,
};
use postloop_scheduler::{EngineSettings, SchedulerEngine, Store};
use rusqlite::Connection;
use tracing::info;

/// Everything a command needs, wired from config.
pub struct App {
    pub config: PostloopConfig,
    pub engine: Arc<SchedulerEngine>,
    pub credentials: SqliteCredentialStore,
}

impl App {
    /// Open the database, run migrations and wire the engine.
    pub fn build(config: PostloopConfig) -> anyhow::Result<Self> {
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path);
        info!(path = %db_path, "opening SQLite database");

        // Each subsystem gets its own connection to the same file.
        let store = Store::new(open_db(&db_path)?)?;
        let credentials = SqliteCredentialStore::new(open_db(&db_path)?)?;
        info!("database migrations complete");

        let registry = build_registry(&config, credentials.clone());
        let engine = SchedulerEngine::builder(store, Arc::new(registry))
            .settings(EngineSettings::from(&config))
            .build();

        Ok(Self {
            config,
            engine: Arc::new(engine),
            credentials,
        })
    }
}

fn open_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Register every adapter enabled in config.
fn build_registry(config: &PostloopConfig, credentials: SqliteCredentialStore) -> ProviderRegistry {
    let providers = &config.providers;
    let timeout = Duration::from_secs(providers.timeout_secs);
    let mut registry = ProviderRegistry::new(Arc::new(credentials));

    if providers.telegram.enabled {
        registry.register(Arc::new(TelegramProvider::new(&providers.telegram, timeout)));
    }
    if providers.mastodon.enabled {
        registry.register(Arc::new(MastodonProvider::new(&providers.mastodon, timeout)));
    }
    if providers.discord.enabled {
        registry.register(Arc::new(DiscordProvider::new(timeout)));
    }
    registry
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
