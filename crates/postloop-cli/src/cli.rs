use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use postloop_core::ProviderKind;
use postloop_scheduler::{Scope, Strategy};

/// postloop: recurring social-media publishing from a content library.
#[derive(Debug, Parser)]
#[command(
    name = "postloop",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("POSTLOOP_GIT_SHA"), ")"),
    about
)]
pub struct Cli {
    /// Config file (defaults to $POSTLOOP_CONFIG, then ~/.postloop/postloop.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database and print its location.
    Init,
    /// Create entries for every due schedule.
    Generate,
    /// Publish PENDING entries inside the lookahead window.
    Dispatch,
    /// Re-attempt recently FAILED entries.
    Retry,
    /// generate, dispatch and retry once.
    Run,
    /// Run every `runner.tick_secs` until Ctrl-C.
    Serve,
    /// Schedule management.
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Content library and one-off posts.
    #[command(subcommand)]
    Post(PostCommand),
    /// Dispatch entry management.
    #[command(subcommand)]
    Entry(EntryCommand),
    /// Provider credentials.
    #[command(subcommand)]
    Credential(CredentialCommand),
}

#[derive(Debug, Args)]
pub struct UserArg {
    /// Owning user id.
    #[arg(long)]
    pub user: String,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Create a recurring schedule.
    Create {
        #[command(flatten)]
        user: UserArg,
        #[arg(long)]
        name: String,
        /// Recurrence rule, e.g. "FREQ=DAILY;BYHOUR=9;BYMINUTE=30".
        #[arg(long)]
        rule: String,
        /// IANA timezone the rule is evaluated in.
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// random, newest_first or oldest_first.
        #[arg(long, default_value = "oldest_first")]
        strategy: Strategy,
        /// all or selected.
        #[arg(long, default_value = "all")]
        scope: Scope,
        /// Start a new cycle automatically once every post was published.
        #[arg(long)]
        auto_reset: bool,
        /// Post to include in a selected-scope pool. Repeatable.
        #[arg(long = "post")]
        posts: Vec<String>,
    },
    /// List a user's schedules.
    List {
        #[command(flatten)]
        user: UserArg,
    },
    /// Show a schedule and its cycle progress.
    Show { id: String },
    /// List a schedule's dispatch entries.
    Entries { id: String },
    /// Replace the selected-scope pool.
    Select {
        id: String,
        #[arg(long = "post")]
        posts: Vec<String>,
    },
    /// Start a new content cycle now.
    Reset { id: String },
    Pause { id: String },
    Resume { id: String },
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
pub enum PostCommand {
    /// Add or replace a post in the content library.
    Add {
        #[command(flatten)]
        user: UserArg,
        /// Post id (a new UUID when omitted).
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        caption: Option<String>,
        /// Public media URL. Repeatable; the first one is published.
        #[arg(long = "asset")]
        assets: Vec<String>,
        /// Provider-specific text, `provider=text`. Repeatable.
        #[arg(long = "text", value_parser = parse_provider_text)]
        texts: Vec<(ProviderKind, String)>,
    },
    /// Publish a post on the next dispatch.
    Now {
        #[command(flatten)]
        user: UserArg,
        post_id: String,
    },
    /// Publish a post once at a given time.
    Once {
        #[command(flatten)]
        user: UserArg,
        post_id: String,
        /// RFC 3339 timestamp, e.g. 2026-05-01T09:00:00Z.
        #[arg(long)]
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Subcommand)]
pub enum EntryCommand {
    Show { id: String },
    /// Cancel a PENDING entry.
    Cancel { id: String },
}

#[derive(Debug, Subcommand)]
pub enum CredentialCommand {
    /// Store credentials, e.g. `--provider telegram bot_token=... chat_id=...`.
    Set {
        #[command(flatten)]
        user: UserArg,
        #[arg(long)]
        provider: ProviderKind,
        #[arg(value_parser = parse_key_value, required = true)]
        fields: Vec<(String, String)>,
    },
    Remove {
        #[command(flatten)]
        user: UserArg,
        #[arg(long)]
        provider: ProviderKind,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn parse_provider_text(raw: &str) -> Result<(ProviderKind, String), String> {
    let (provider, text) = parse_key_value(raw)?;
    let kind = provider.parse::<ProviderKind>().map_err(|e| e.to_string())?;
    Ok((kind, text))
}
