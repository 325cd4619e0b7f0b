use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOOKAHEAD_SECS: u64 = 60;
pub const DEFAULT_DISPATCH_BATCH: usize = 50;
pub const DEFAULT_MIN_SPACING_MS: u64 = 1_000; // one outbound provider call per second
pub const DEFAULT_RETRY_WINDOW_HOURS: u64 = 24;
pub const DEFAULT_RETRY_BATCH: usize = 20;
pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Top-level config (postloop.toml + POSTLOOP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostloopConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Dispatch phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Entries scheduled up to this many seconds in the future are published early.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u64,
    /// Maximum entries processed per invocation.
    #[serde(default = "default_dispatch_batch")]
    pub batch_limit: usize,
    /// Minimum spacing between two outbound provider calls, process-wide.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: DEFAULT_LOOKAHEAD_SECS,
            batch_limit: DEFAULT_DISPATCH_BATCH,
            min_spacing_ms: DEFAULT_MIN_SPACING_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// FAILED entries older than this are never retried.
    #[serde(default = "default_retry_window_hours")]
    pub window_hours: u64,
    #[serde(default = "default_retry_batch")]
    pub batch_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_hours: DEFAULT_RETRY_WINDOW_HOURS,
            batch_limit: DEFAULT_RETRY_BATCH,
        }
    }
}

/// Settings for the `serve` loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// HTTP timeout applied to every provider request.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub mastodon: MastodonConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            telegram: TelegramConfig::default(),
            mastodon: MastodonConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: default_telegram_api_base(),
        }
    }
}

/// Mastodon instances are per-user, so the instance URL lives in the credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Visibility of published statuses (`public`, `unlisted`, `private`).
    #[serde(default = "default_mastodon_visibility")]
    pub visibility: String,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            visibility: default_mastodon_visibility(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn bool_true() -> bool {
    true
}
fn default_lookahead_secs() -> u64 {
    DEFAULT_LOOKAHEAD_SECS
}
fn default_dispatch_batch() -> usize {
    DEFAULT_DISPATCH_BATCH
}
fn default_min_spacing_ms() -> u64 {
    DEFAULT_MIN_SPACING_MS
}
fn default_retry_window_hours() -> u64 {
    DEFAULT_RETRY_WINDOW_HOURS
}
fn default_retry_batch() -> usize {
    DEFAULT_RETRY_BATCH
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_mastodon_visibility() -> String {
    "public".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.postloop/postloop.db", home)
}

impl PostloopConfig {
    /// Load config from a TOML file with POSTLOOP_* env var overrides.
    ///
    /// Nested keys use a double underscore: `POSTLOOP_DISPATCH__BATCH_LIMIT=10`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("POSTLOOP_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.postloop/postloop.toml", home)
}
