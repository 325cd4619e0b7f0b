use std::collections::BTreeMap;

use anyhow::Context;
use chrono::Utc;
use postloop_core::{ContentItem, MediaAsset, UserId};
use postloop_providers::Credentials;
use postloop_scheduler::NewSchedule;
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use crate::{
    app::App,
    cli::{CredentialCommand, EntryCommand, PostCommand, ScheduleCommand},
};

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn init(app: &App) -> anyhow::Result<()> {
    print_json(&json!({ "database": app.config.database.path }))
}

pub fn generate(app: &App) -> anyhow::Result<()> {
    let count = app.engine.generate(Utc::now())?;
    print_json(&json!({ "generated": count }))
}

pub async fn dispatch(app: &App) -> anyhow::Result<()> {
    let count = app.engine.dispatch(Utc::now()).await?;
    print_json(&json!({ "dispatched": count }))
}

pub async fn retry(app: &App) -> anyhow::Result<()> {
    let count = app.engine.retry(Utc::now()).await?;
    print_json(&json!({ "retried": count }))
}

pub async fn run(app: &App) -> anyhow::Result<()> {
    let report = app.engine.run_once(Utc::now()).await;
    print_json(&report)
}

/// Tick until Ctrl-C, then let the loop finish its current pass.
pub async fn serve(app: &App) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = std::sync::Arc::clone(&app.engine);
    let handle = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

pub fn schedule(app: &App, command: ScheduleCommand) -> anyhow::Result<()> {
    let engine = &app.engine;
    let now = Utc::now();
    match command {
        ScheduleCommand::Create {
            user,
            name,
            rule,
            timezone,
            strategy,
            scope,
            auto_reset,
            posts,
        } => {
            let schedule = engine.create_schedule(
                NewSchedule {
                    user_id: UserId::from(user.user),
                    name,
                    strategy,
                    scope,
                    rule,
                    timezone,
                    auto_reset,
                    selected_post_ids: posts,
                },
                now,
            )?;
            print_json(&schedule)
        }
        ScheduleCommand::List { user } => {
            print_json(&engine.list_schedules(&UserId::from(user.user))?)
        }
        ScheduleCommand::Show { id } => {
            let schedule = engine.get_schedule(&id)?;
            let stats = engine.schedule_stats(&id)?;
            print_json(&json!({ "schedule": schedule, "stats": stats }))
        }
        ScheduleCommand::Entries { id } => print_json(&engine.entries_for_schedule(&id)?),
        ScheduleCommand::Select { id, posts } => {
            engine.set_selected_items(&id, &posts)?;
            print_json(&json!({ "schedule_id": id, "selected": engine.selected_items(&id)? }))
        }
        ScheduleCommand::Reset { id } => print_json(&engine.reset_cycle(&id, now)?),
        ScheduleCommand::Pause { id } => print_json(&engine.set_active(&id, false, now)?),
        ScheduleCommand::Resume { id } => print_json(&engine.set_active(&id, true, now)?),
        ScheduleCommand::Delete { id } => {
            engine.delete_schedule(&id)?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

pub fn post(app: &App, command: PostCommand) -> anyhow::Result<()> {
    let now = Utc::now();
    match command {
        PostCommand::Add {
            user,
            id,
            caption,
            assets,
            texts,
        } => {
            let item = ContentItem {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                user_id: UserId::from(user.user),
                caption,
                assets: assets.into_iter().map(MediaAsset::new).collect(),
                texts: texts.into_iter().collect::<BTreeMap<_, _>>(),
                created_at: now,
            };
            app.engine.store().insert_item(&item)?;
            print_json(&item)
        }
        PostCommand::Now { user, post_id } => {
            print_json(&app.engine.post_now(&UserId::from(user.user), &post_id, now)?)
        }
        PostCommand::Once { user, post_id, at } => print_json(
            &app.engine
                .schedule_once(&UserId::from(user.user), &post_id, at, now)?,
        ),
    }
}

pub fn entry(app: &App, command: EntryCommand) -> anyhow::Result<()> {
    match command {
        EntryCommand::Show { id } => print_json(&app.engine.get_entry(&id)?),
        EntryCommand::Cancel { id } => print_json(&app.engine.cancel_entry(&id, Utc::now())?),
    }
}

pub fn credential(app: &App, command: CredentialCommand) -> anyhow::Result<()> {
    match command {
        CredentialCommand::Set {
            user,
            provider,
            fields,
        } => {
            let credentials = fields
                .into_iter()
                .fold(Credentials::new(), |c, (k, v)| c.with(&k, v));
            let user = UserId::from(user.user);
            app.credentials.set(&user, provider, &credentials)?;
            // Echo field names only.
            let keys: Vec<&str> = credentials.keys().collect();
            print_json(&json!({ "user": user, "provider": provider, "fields": keys }))
        }
        CredentialCommand::Remove { user, provider } => {
            let removed = app.credentials.remove(&UserId::from(user.user), provider)?;
            print_json(&json!({ "provider": provider, "removed": removed }))
        }
    }
}
