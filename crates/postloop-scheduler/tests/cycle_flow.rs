//! End-to-end scheduling flows against in-memory SQLite and fake providers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use postloop_core::{ContentItem, MediaAsset, ProviderKind, UserId};
use postloop_providers::{
    Credentials, Provider, ProviderError, ProviderRegistry, Receipt, SqliteCredentialStore,
};
use postloop_scheduler::{
    EngineSettings, EntryStatus, NewSchedule, NoGate, SchedulerEngine, Scope, Store, Strategy,
};
use rusqlite::Connection;

struct FakeProvider {
    kind: ProviderKind,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn publish(
        &self,
        item: &ContentItem,
        _credentials: &Credentials,
    ) -> Result<Receipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        let mut receipt = Receipt::new(self.kind);
        receipt.remote_id = Some(format!("{}-{}", self.kind, item.id));
        Ok(receipt)
    }
}

struct Harness {
    engine: SchedulerEngine,
    credentials: SqliteCredentialStore,
    telegram: Arc<FakeProvider>,
    mastodon: Arc<FakeProvider>,
}

const USER: &str = "user-1";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn user() -> UserId {
    USER.into()
}

fn harness(posts: &[&str]) -> Harness {
    let store = Store::open_in_memory().unwrap();
    for (i, id) in posts.iter().enumerate() {
        store
            .insert_item(&ContentItem {
                id: (*id).to_string(),
                user_id: user(),
                caption: Some(format!("caption {id}")),
                assets: vec![MediaAsset::new(format!("https://cdn.example/{id}.png"))],
                texts: Default::default(),
                created_at: t0() - Duration::days(30) + Duration::hours(i as i64),
            })
            .unwrap();
    }

    let credentials = SqliteCredentialStore::new(Connection::open_in_memory().unwrap()).unwrap();
    let telegram = FakeProvider::new(ProviderKind::Telegram);
    let mastodon = FakeProvider::new(ProviderKind::Mastodon);
    let registry = ProviderRegistry::new(Arc::new(credentials.clone()))
        .with(telegram.clone())
        .with(mastodon.clone());

    let engine = SchedulerEngine::builder(store, Arc::new(registry))
        .settings(EngineSettings::default())
        .gate(Arc::new(NoGate))
        .seed(11)
        .build();

    Harness {
        engine,
        credentials,
        telegram,
        mastodon,
    }
}

impl Harness {
    fn configure(&self, kind: ProviderKind) {
        self.credentials
            .set(&user(), kind, &Credentials::new().with("token", "secret"))
            .unwrap();
    }

    fn schedule(&self, strategy: Strategy, auto_reset: bool) -> String {
        self.create(strategy, Scope::All, auto_reset, &[]).unwrap()
    }

    fn create(
        &self,
        strategy: Strategy,
        scope: Scope,
        auto_reset: bool,
        selected: &[&str],
    ) -> postloop_scheduler::Result<String> {
        self.engine
            .create_schedule(
                NewSchedule {
                    user_id: user(),
                    name: "every minute".into(),
                    strategy,
                    scope,
                    rule: "FREQ=MINUTELY;INTERVAL=1".into(),
                    timezone: "UTC".into(),
                    auto_reset,
                    selected_post_ids: selected.iter().map(|s| s.to_string()).collect(),
                },
                t0(),
            )
            .map(|s| s.id)
    }

    fn add_post(&self, id: &str, owner: &str, assets: Vec<MediaAsset>, age_days: i64) {
        self.engine
            .store()
            .insert_item(&ContentItem {
                id: id.to_string(),
                user_id: owner.into(),
                caption: Some(format!("caption {id}")),
                assets,
                texts: Default::default(),
                created_at: t0() - Duration::days(age_days),
            })
            .unwrap();
    }

    /// Run generate + dispatch at minute `n` after t0; return the post id that
    /// was published, if any.
    async fn tick(&self, schedule_id: &str, n: i64) -> Option<String> {
        let now = t0() + Duration::minutes(n);
        let created = self.engine.generate(now).unwrap();
        self.engine.dispatch(now).await.unwrap();
        if created == 0 {
            return None;
        }
        let entries = self.engine.entries_for_schedule(schedule_id).unwrap();
        let latest = entries.first().unwrap();
        assert_eq!(latest.scheduled_at, now);
        assert_eq!(latest.status, EntryStatus::Posted);
        Some(latest.post_id.clone())
    }
}

#[tokio::test]
async fn oldest_first_cycles_and_auto_resets() {
    let h = harness(&["A", "B", "C"]);
    h.configure(ProviderKind::Telegram);
    let sid = h.schedule(Strategy::OldestFirst, true);

    let mut published = Vec::new();
    for n in 1..=3 {
        published.push(h.tick(&sid, n).await.unwrap());
    }
    assert_eq!(h.engine.get_schedule(&sid).unwrap().reset_count, 0);
    assert!(h.engine.schedule_stats(&sid).unwrap().cycle_complete);

    published.push(h.tick(&sid, 4).await.unwrap());
    assert_eq!(published, vec!["A", "B", "C", "A"]);

    let schedule = h.engine.get_schedule(&sid).unwrap();
    assert_eq!(schedule.reset_count, 1);
    assert_eq!(schedule.last_reset_at, Some(t0() + Duration::minutes(4)));

    let stats = h.engine.schedule_stats(&sid).unwrap();
    assert_eq!((stats.total, stats.posted, stats.remaining), (3, 1, 2));
    assert_eq!(h.tick(&sid, 5).await.as_deref(), Some("B"));
}

#[tokio::test]
async fn random_auto_reset_fires_once_the_pool_is_exhausted() {
    let h = harness(&["p1", "p2", "p3"]);
    h.configure(ProviderKind::Telegram);
    let sid = h.schedule(Strategy::Random, true);

    let mut first_cycle = Vec::new();
    for n in 1..=3 {
        first_cycle.push(h.tick(&sid, n).await.unwrap());
    }
    first_cycle.sort();
    assert_eq!(first_cycle, vec!["p1", "p2", "p3"]);
    assert_eq!(h.engine.get_schedule(&sid).unwrap().reset_count, 0);

    let next = h.tick(&sid, 4).await.unwrap();
    assert!(first_cycle.contains(&next));
    let schedule = h.engine.get_schedule(&sid).unwrap();
    assert_eq!(schedule.reset_count, 1);
    assert_eq!(schedule.last_reset_at, Some(t0() + Duration::minutes(4)));
    assert_eq!(h.engine.schedule_stats(&sid).unwrap().posted, 1);

    assert!(h.tick(&sid, 5).await.is_some());
    assert_eq!(h.engine.get_schedule(&sid).unwrap().reset_count, 1);
}

#[tokio::test]
async fn selected_scope_cycles_through_curated_posts_only() {
    let h = harness(&["A", "B", "C"]);
    h.configure(ProviderKind::Telegram);
    // Curated posts need no asset; foreign posts never qualify.
    h.add_post("D", USER, vec![], 1);
    h.add_post("X", "user-2", vec![MediaAsset::new("https://cdn.example/x.png")], 60);

    assert!(h
        .create(Strategy::OldestFirst, Scope::Selected, true, &["C", "X"])
        .is_err());
    let sid = h
        .create(Strategy::OldestFirst, Scope::Selected, true, &["C", "D"])
        .unwrap();
    // Bypass the engine's ownership check to plant a foreign post.
    h.engine
        .store()
        .set_selected_items(&sid, &["C".into(), "D".into(), "X".into()])
        .unwrap();
    assert_eq!(h.engine.schedule_stats(&sid).unwrap().total, 2);

    let mut published = Vec::new();
    for n in 1..=4 {
        published.push(h.tick(&sid, n).await.unwrap());
    }
    assert_eq!(published, vec!["C", "D", "C", "D"]);
    assert_eq!(h.engine.get_schedule(&sid).unwrap().reset_count, 1);
}

#[tokio::test]
async fn all_scope_ignores_posts_without_a_deliverable_asset() {
    let h = harness(&["A", "B"]);
    h.configure(ProviderKind::Telegram);
    h.add_post("bare", USER, vec![], 60);
    h.add_post("blank", USER, vec![MediaAsset::new("")], 60);
    let sid = h.schedule(Strategy::OldestFirst, false);

    let stats = h.engine.schedule_stats(&sid).unwrap();
    assert_eq!((stats.total, stats.remaining), (2, 2));

    assert_eq!(h.tick(&sid, 1).await.as_deref(), Some("A"));
    assert_eq!(h.tick(&sid, 2).await.as_deref(), Some("B"));
    assert_eq!(h.tick(&sid, 3).await, None);
}

#[tokio::test]
async fn newest_first_walks_backwards_through_creation_order() {
    let h = harness(&["old", "mid", "new"]);
    h.configure(ProviderKind::Telegram);
    let sid = h.schedule(Strategy::NewestFirst, false);

    let mut published = Vec::new();
    for n in 1..=3 {
        published.push(h.tick(&sid, n).await.unwrap());
    }
    assert_eq!(published, vec!["new", "mid", "old"]);
}

#[tokio::test]
async fn random_without_auto_reset_exhausts_until_manual_reset() {
    let h = harness(&["p1", "p2", "p3", "p4"]);
    h.configure(ProviderKind::Telegram);
    let sid = h.schedule(Strategy::Random, false);

    let mut published = Vec::new();
    for n in 1..=4 {
        published.push(h.tick(&sid, n).await.unwrap());
    }
    published.sort();
    assert_eq!(published, vec!["p1", "p2", "p3", "p4"]);

    // Exhausted: occurrences are skipped but next_run keeps advancing.
    for n in 5..=7 {
        assert_eq!(h.tick(&sid, n).await, None);
    }
    let schedule = h.engine.get_schedule(&sid).unwrap();
    assert_eq!(schedule.reset_count, 0);
    assert_eq!(schedule.next_run, Some(t0() + Duration::minutes(8)));

    h.engine.reset_cycle(&sid, t0() + Duration::minutes(7)).unwrap();
    assert!(h.tick(&sid, 8).await.is_some());
    assert_eq!(h.engine.get_schedule(&sid).unwrap().reset_count, 1);
}

#[tokio::test]
async fn generate_is_idempotent_without_time_advancing() {
    let h = harness(&["A", "B"]);
    let first = h.schedule(Strategy::OldestFirst, false);
    let second = h.schedule(Strategy::NewestFirst, false);

    let now = t0() + Duration::minutes(1);
    assert_eq!(h.engine.generate(now).unwrap(), 2);
    assert_eq!(h.engine.generate(now).unwrap(), 0);
    assert_eq!(h.engine.entries_for_schedule(&first).unwrap().len(), 1);
    assert_eq!(h.engine.entries_for_schedule(&second).unwrap().len(), 1);
}

#[tokio::test]
async fn partial_provider_failure_still_posts() {
    let h = harness(&["A"]);
    h.configure(ProviderKind::Telegram);
    h.configure(ProviderKind::Mastodon);
    h.mastodon.set_failing(true);

    let entry = h.engine.post_now(&user(), "A", t0()).unwrap();
    assert_eq!(h.engine.dispatch(t0()).await.unwrap(), 1);

    let posted = h.engine.get_entry(&entry.id).unwrap();
    assert_eq!(posted.status, EntryStatus::Posted);
    assert_eq!(posted.posted_at, Some(t0()));
    let message = posted.error_message.unwrap();
    assert!(message.starts_with("mastodon: "), "{message}");
    assert!(!message.contains("telegram"));
    assert_eq!((h.telegram.calls(), h.mastodon.calls()), (1, 1));
}

#[tokio::test]
async fn all_providers_failing_marks_failed_with_every_reason() {
    let h = harness(&["A"]);
    h.configure(ProviderKind::Telegram);
    h.configure(ProviderKind::Mastodon);
    h.telegram.set_failing(true);
    h.mastodon.set_failing(true);

    let entry = h.engine.post_now(&user(), "A", t0()).unwrap();
    h.engine.dispatch(t0()).await.unwrap();

    let failed = h.engine.get_entry(&entry.id).unwrap();
    assert_eq!(failed.status, EntryStatus::Failed);
    let message = failed.error_message.unwrap();
    let parts: Vec<&str> = message.split("; ").collect();
    assert_eq!(parts.len(), 2);
    assert!(parts[0].starts_with("telegram: "));
    assert!(parts[1].starts_with("mastodon: "));
}

#[tokio::test]
async fn zero_providers_fails_without_any_call() {
    let h = harness(&["A"]);
    let entry = h.engine.post_now(&user(), "A", t0()).unwrap();
    h.engine.dispatch(t0()).await.unwrap();

    let failed = h.engine.get_entry(&entry.id).unwrap();
    assert_eq!(failed.status, EntryStatus::Failed);
    assert_eq!(h.telegram.calls() + h.mastodon.calls(), 0);
}

#[tokio::test]
async fn lookahead_bounds_what_is_dispatched() {
    let h = harness(&["A"]);
    h.configure(ProviderKind::Telegram);
    let soon = h
        .engine
        .schedule_once(&user(), "A", t0() + Duration::seconds(30), t0())
        .unwrap();
    let later = h
        .engine
        .schedule_once(&user(), "A", t0() + Duration::hours(2), t0())
        .unwrap();

    assert_eq!(h.engine.dispatch(t0()).await.unwrap(), 1);
    assert_eq!(h.engine.get_entry(&soon.id).unwrap().status, EntryStatus::Posted);
    assert_eq!(h.engine.get_entry(&later.id).unwrap().status, EntryStatus::Pending);
}

#[tokio::test]
async fn retry_recovers_recent_failures_only() {
    let h = harness(&["A", "B"]);
    h.configure(ProviderKind::Telegram);
    h.telegram.set_failing(true);

    let stale = h.engine.post_now(&user(), "A", t0()).unwrap();
    h.engine.dispatch(t0()).await.unwrap();
    let later = t0() + Duration::hours(20);
    let recent = h.engine.post_now(&user(), "B", later).unwrap();
    h.engine.dispatch(later).await.unwrap();

    // A second failed retry does not move the window anchor.
    assert_eq!(h.engine.retry(later).await.unwrap(), 2);
    assert_eq!(h.engine.get_entry(&stale.id).unwrap().failed_at, Some(t0()));

    h.telegram.set_failing(false);
    let now = t0() + Duration::hours(25);
    assert_eq!(h.engine.retry(now).await.unwrap(), 1);

    let stale = h.engine.get_entry(&stale.id).unwrap();
    assert_eq!(stale.status, EntryStatus::Failed);
    assert_eq!(stale.attempts, 2);

    let recent = h.engine.get_entry(&recent.id).unwrap();
    assert_eq!(recent.status, EntryStatus::Posted);
    assert_eq!(recent.error_message, None);
    assert_eq!(recent.posted_at, Some(now));
    assert_eq!(recent.attempts, 3);
}

#[tokio::test]
async fn run_once_reports_every_phase() {
    let h = harness(&["A", "B"]);
    h.configure(ProviderKind::Telegram);
    h.schedule(Strategy::OldestFirst, false);

    let report = h.engine.run_once(t0() + Duration::minutes(1)).await;
    assert_eq!(report.generated, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.retried, 0);
}
