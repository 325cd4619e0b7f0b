use clap::Parser;
use postloop_core::PostloopConfig;

mod app;
mod cli;
mod commands;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postloop=info,postloop_scheduler=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config > POSTLOOP_CONFIG env > ~/.postloop/postloop.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("POSTLOOP_CONFIG").ok());
    let config = PostloopConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        PostloopConfig::default()
    });

    let app = app::App::build(config)?;

    match cli.command {
        Command::Init => commands::init(&app),
        Command::Generate => commands::generate(&app),
        Command::Dispatch => commands::dispatch(&app).await,
        Command::Retry => commands::retry(&app).await,
        Command::Run => commands::run(&app).await,
        Command::Serve => commands::serve(&app).await,
        Command::Schedule(cmd) => commands::schedule(&app, cmd),
        Command::Post(cmd) => commands::post(&app, cmd),
        Command::Entry(cmd) => commands::entry(&app, cmd),
        Command::Credential(cmd) => commands::credential(&app, cmd),
    }
}
