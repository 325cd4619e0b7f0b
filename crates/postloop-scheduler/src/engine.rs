use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use postloop_core::{PostloopConfig, UserId};
use postloop_providers::ProviderRegistry;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    content::ContentStore,
    dispatch::{DispatchWorker, EntryPublisher},
    error::{Result, SchedulerError},
    gate::{IntervalGate, RateGate},
    generator::EntryGenerator,
    lock::{LocalLock, ScheduleLock},
    pool::{ContentPool, CycleTracker, EntryHistory},
    recurrence::{compute_next_run, Recurrence},
    retry::RetryManager,
    stats::schedule_stats,
    store::Store,
    strategy::StrategySelector,
    types::{DispatchEntry, EntryStatus, NewSchedule, RunReport, Schedule, ScheduleStats, Scope},
};

/// Upper bound for configured durations, so date arithmetic cannot overflow.
const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 3600;

fn clamp_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Runtime knobs of the three phases.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub lookahead: Duration,
    pub dispatch_batch: usize,
    pub min_spacing: std::time::Duration,
    pub retry_enabled: bool,
    pub retry_window: Duration,
    pub retry_batch: usize,
    /// Period of the [`SchedulerEngine::run`] loop.
    pub tick: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&PostloopConfig::default())
    }
}

impl From<&PostloopConfig> for EngineSettings {
    fn from(config: &PostloopConfig) -> Self {
        Self {
            lookahead: clamp_secs(config.dispatch.lookahead_secs),
            dispatch_batch: config.dispatch.batch_limit,
            min_spacing: std::time::Duration::from_millis(config.dispatch.min_spacing_ms),
            retry_enabled: config.retry.enabled,
            retry_window: clamp_secs(config.retry.window_hours.saturating_mul(3600)),
            retry_batch: config.retry.batch_limit,
            tick: std::time::Duration::from_secs(config.runner.tick_secs.max(1)),
        }
    }
}

/// Wires an engine from its collaborators. Anything left unset falls back to
/// the SQLite store, an [`IntervalGate`] and a [`LocalLock`].
pub struct EngineBuilder {
    store: Store,
    registry: Arc<ProviderRegistry>,
    settings: EngineSettings,
    content: Option<Arc<dyn ContentStore>>,
    history: Option<Arc<dyn EntryHistory>>,
    gate: Option<Arc<dyn RateGate>>,
    lock: Option<Arc<dyn ScheduleLock>>,
    seed: Option<u64>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn content(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn history(mut self, history: Arc<dyn EntryHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn ScheduleLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Seed the RANDOM strategy.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> SchedulerEngine {
        let store = self.store;
        let content: Arc<dyn ContentStore> =
            self.content.unwrap_or_else(|| Arc::new(store.clone()));
        let history: Arc<dyn EntryHistory> =
            self.history.unwrap_or_else(|| Arc::new(store.clone()));
        let gate: Arc<dyn RateGate> = self
            .gate
            .unwrap_or_else(|| Arc::new(IntervalGate::new(self.settings.min_spacing)));
        let lock: Arc<dyn ScheduleLock> = self.lock.unwrap_or_else(|| Arc::new(LocalLock::new()));

        let pool = ContentPool::new(Arc::clone(&content), history, store.clone());
        let cycles = CycleTracker::new(store.clone());
        let selector = Arc::new(match self.seed {
            Some(seed) => StrategySelector::with_seed(pool.clone(), cycles.clone(), seed),
            None => StrategySelector::new(pool.clone(), cycles.clone()),
        });
        let publisher = Arc::new(EntryPublisher::new(Arc::clone(&content), self.registry, gate));

        SchedulerEngine {
            generator: EntryGenerator::new(store.clone(), selector, Arc::clone(&lock)),
            dispatcher: DispatchWorker::new(store.clone(), Arc::clone(&publisher), Arc::clone(&lock)),
            retrier: RetryManager::new(store.clone(), publisher, lock),
            settings: self.settings,
            store,
            content,
            pool,
            cycles,
        }
    }
}

/// Entry point of the scheduling core: schedule management, the
/// generate → dispatch → retry phases and manual one-off posts.
pub struct SchedulerEngine {
    store: Store,
    content: Arc<dyn ContentStore>,
    pool: ContentPool,
    cycles: CycleTracker,
    generator: EntryGenerator,
    dispatcher: DispatchWorker,
    retrier: RetryManager,
    settings: EngineSettings,
}

impl SchedulerEngine {
    pub fn builder(store: Store, registry: Arc<ProviderRegistry>) -> EngineBuilder {
        EngineBuilder {
            store,
            registry,
            settings: EngineSettings::default(),
            content: None,
            history: None,
            gate: None,
            lock: None,
            seed: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // --- schedules -----------------------------------------------------------

    /// Validate and persist a schedule; its first `next_run` follows `now`.
    pub fn create_schedule(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<Schedule> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(SchedulerError::InvalidSchedule("name must not be empty".into()));
        }
        let rule = new.rule.parse::<Recurrence>()?;
        new.timezone.parse::<Tz>().map_err(|_| {
            SchedulerError::InvalidSchedule(format!("unknown timezone {:?}", new.timezone))
        })?;
        self.validate_posts(&new.user_id, &new.selected_post_ids)?;

        let schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            name: name.to_string(),
            strategy: new.strategy,
            scope: new.scope,
            rule: rule.to_string(),
            next_run: compute_next_run(&new.rule, &new.timezone, now),
            timezone: new.timezone,
            is_active: true,
            auto_reset: new.auto_reset,
            reset_count: 0,
            last_reset_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_schedule(&schedule)?;
        if !new.selected_post_ids.is_empty() {
            self.store.set_selected_items(&schedule.id, &new.selected_post_ids)?;
        }
        info!(
            schedule_id = %schedule.id,
            user_id = %schedule.user_id,
            strategy = %schedule.strategy,
            next_run = ?schedule.next_run,
            "schedule created"
        );
        Ok(schedule)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Schedule> {
        self.store.require_schedule(id)
    }

    pub fn list_schedules(&self, user: &UserId) -> Result<Vec<Schedule>> {
        self.store.list_schedules(user)
    }

    /// Replace the curated pool. Only meaningful for [`Scope::Selected`].
    pub fn set_selected_items(&self, schedule_id: &str, post_ids: &[String]) -> Result<()> {
        let schedule = self.store.require_schedule(schedule_id)?;
        self.validate_posts(&schedule.user_id, post_ids)?;
        self.store.set_selected_items(schedule_id, post_ids)?;
        if schedule.scope != Scope::Selected {
            info!(schedule_id, "selected items stored but schedule scope is all");
        }
        Ok(())
    }

    pub fn selected_items(&self, schedule_id: &str) -> Result<Vec<String>> {
        self.store.require_schedule(schedule_id)?;
        self.store.selected_item_ids(schedule_id)
    }

    /// Pause or resume. Resuming recomputes `next_run` from `now` so missed
    /// occurrences are not replayed.
    pub fn set_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<Schedule> {
        let schedule = self.store.require_schedule(id)?;
        let next_run = if active {
            compute_next_run(&schedule.rule, &schedule.timezone, now)
        } else {
            schedule.next_run
        };
        self.store.set_active(id, active, next_run, now)?;
        info!(schedule_id = %id, active, "schedule activation changed");
        self.store.require_schedule(id)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        self.store.delete_schedule(id)
    }

    /// Manually start a new content cycle.
    pub fn reset_cycle(&self, id: &str, now: DateTime<Utc>) -> Result<Schedule> {
        let mut schedule = self.store.require_schedule(id)?;
        self.cycles.reset(&mut schedule, now)?;
        Ok(schedule)
    }

    pub fn schedule_stats(&self, id: &str) -> Result<ScheduleStats> {
        let schedule = self.store.require_schedule(id)?;
        schedule_stats(&self.pool, &schedule)
    }

    // --- entries -------------------------------------------------------------

    pub fn entries_for_schedule(&self, schedule_id: &str) -> Result<Vec<DispatchEntry>> {
        self.store.require_schedule(schedule_id)?;
        self.store.entries_for_schedule(schedule_id)
    }

    pub fn get_entry(&self, id: &str) -> Result<DispatchEntry> {
        self.store
            .get_entry(id)?
            .ok_or_else(|| SchedulerError::EntryNotFound { id: id.to_string() })
    }

    /// PENDING → CANCELED. Any other status is an [`SchedulerError::InvalidTransition`].
    pub fn cancel_entry(&self, id: &str, now: DateTime<Utc>) -> Result<DispatchEntry> {
        let entry = self.get_entry(id)?;
        if entry.status == EntryStatus::Pending && self.store.cancel_entry(id, now)? {
            info!(entry_id = %id, "entry canceled");
            return self.get_entry(id);
        }
        let current = self.get_entry(id)?;
        Err(SchedulerError::InvalidTransition {
            id: id.to_string(),
            status: current.status,
            action: "cancel",
        })
    }

    /// Ad hoc entry due immediately.
    pub fn post_now(&self, user: &UserId, post_id: &str, now: DateTime<Utc>) -> Result<DispatchEntry> {
        self.schedule_once(user, post_id, now, now)
    }

    /// Ad hoc entry due at `at`. A time in the past is dispatched on the next run.
    pub fn schedule_once(
        &self,
        user: &UserId,
        post_id: &str,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DispatchEntry> {
        self.validate_posts(user, &[post_id.to_string()])?;
        let entry = DispatchEntry::pending(None, post_id, user, at, now);
        self.store.insert_entry(&entry)?;
        info!(entry_id = %entry.id, post_id, scheduled_at = %at, "one-off entry created");
        Ok(entry)
    }

    fn validate_posts(&self, user: &UserId, post_ids: &[String]) -> Result<()> {
        for post_id in post_ids {
            match self.content.get_item(post_id)? {
                Some(item) if &item.user_id == user => {}
                _ => return Err(SchedulerError::PostNotFound { id: post_id.clone() }),
            }
        }
        Ok(())
    }

    // --- phases --------------------------------------------------------------

    pub fn generate(&self, now: DateTime<Utc>) -> Result<usize> {
        self.generator.generate_due(now)
    }

    pub async fn dispatch(&self, now: DateTime<Utc>) -> Result<usize> {
        self.dispatcher
            .dispatch_due(now, self.settings.lookahead, self.settings.dispatch_batch)
            .await
    }

    /// No-op when retries are disabled.
    pub async fn retry(&self, now: DateTime<Utc>) -> Result<usize> {
        if !self.settings.retry_enabled {
            return Ok(0);
        }
        self.retrier
            .retry_recent(now, self.settings.retry_window, self.settings.retry_batch)
            .await
    }

    /// generate, dispatch, retry. A failing phase is logged and counts zero.
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let generated = self.generate(now).unwrap_or_else(|e| {
            error!("generate phase failed: {e}");
            0
        });
        let dispatched = self.dispatch(now).await.unwrap_or_else(|e| {
            error!("dispatch phase failed: {e}");
            0
        });
        let retried = self.retry(now).await.unwrap_or_else(|e| {
            error!("retry phase failed: {e}");
            0
        });
        RunReport {
            generated,
            dispatched,
            retried,
        }
    }

    /// Run [`SchedulerEngine::run_once`] every tick until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.settings.tick.as_secs(), "scheduler engine started");

        let mut interval = tokio::time::interval(self.settings.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    if report != RunReport::default() {
                        info!(
                            generated = report.generated,
                            dispatched = report.dispatched,
                            retried = report.retried,
                            "scheduler tick"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;
    use postloop_core::{ContentItem, MediaAsset, ProviderKind};
    use postloop_providers::{CredentialStore, Credentials, ProviderError};

    use super::*;
    use crate::gate::NoGate;
    use crate::types::Strategy;

    struct NoCredentials;

    impl CredentialStore for NoCredentials {
        fn configured_providers(&self, _: &UserId) -> std::result::Result<BTreeSet<ProviderKind>, ProviderError> {
            Ok(BTreeSet::new())
        }

        fn credentials(&self, _: &UserId, _: ProviderKind) -> std::result::Result<Option<Credentials>, ProviderError> {
            Ok(None)
        }
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn engine() -> SchedulerEngine {
        let store = Store::open_in_memory().unwrap();
        for (id, user) in [("p1", "u1"), ("p2", "u2")] {
            store
                .insert_item(&ContentItem {
                    id: id.into(),
                    user_id: user.into(),
                    caption: None,
                    assets: vec![MediaAsset::new("https://cdn/a.png")],
                    texts: Default::default(),
                    created_at: t(0, 0),
                })
                .unwrap();
        }
        let registry = Arc::new(ProviderRegistry::new(Arc::new(NoCredentials)));
        SchedulerEngine::builder(store, registry)
            .gate(Arc::new(NoGate))
            .build()
    }

    fn new_schedule(rule: &str, timezone: &str) -> NewSchedule {
        NewSchedule {
            user_id: "u1".into(),
            name: "daily".into(),
            strategy: Strategy::OldestFirst,
            scope: Scope::All,
            rule: rule.into(),
            timezone: timezone.into(),
            auto_reset: false,
            selected_post_ids: vec![],
        }
    }

    #[test]
    fn create_computes_first_run_and_normalizes_rule() {
        let engine = engine();
        let s = engine
            .create_schedule(new_schedule("rrule:freq=daily;byhour=9", "UTC"), t(10, 0))
            .unwrap();
        assert_eq!(s.rule, "FREQ=DAILY;BYHOUR=9;BYMINUTE=0");
        assert_eq!(s.next_run, Some(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()));
        assert_eq!(engine.list_schedules(&"u1".into()).unwrap().len(), 1);
    }

    #[test]
    fn create_rejects_bad_input() {
        let engine = engine();
        assert!(matches!(
            engine.create_schedule(new_schedule("FREQ=YEARLY", "UTC"), t(10, 0)),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(matches!(
            engine.create_schedule(new_schedule("FREQ=HOURLY", "Nowhere/City"), t(10, 0)),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        let mut foreign = new_schedule("FREQ=HOURLY", "UTC");
        foreign.scope = Scope::Selected;
        foreign.selected_post_ids = vec!["p2".into()];
        assert!(matches!(
            engine.create_schedule(foreign, t(10, 0)),
            Err(SchedulerError::PostNotFound { .. })
        ));
    }

    #[test]
    fn resume_skips_missed_occurrences() {
        let engine = engine();
        let s = engine
            .create_schedule(new_schedule("FREQ=HOURLY;BYMINUTE=0", "UTC"), t(10, 30))
            .unwrap();
        engine.set_active(&s.id, false, t(10, 40)).unwrap();
        assert_eq!(engine.generate(t(14, 0)).unwrap(), 0);

        let resumed = engine.set_active(&s.id, true, t(14, 10)).unwrap();
        assert!(resumed.is_active);
        assert_eq!(resumed.next_run, Some(t(15, 0)));
    }

    #[test]
    fn cancel_only_from_pending() {
        let engine = engine();
        let entry = engine.schedule_once(&"u1".into(), "p1", t(12, 0), t(10, 0)).unwrap();
        let canceled = engine.cancel_entry(&entry.id, t(10, 5)).unwrap();
        assert_eq!(canceled.status, EntryStatus::Canceled);
        assert!(matches!(
            engine.cancel_entry(&entry.id, t(10, 6)),
            Err(SchedulerError::InvalidTransition { status: EntryStatus::Canceled, .. })
        ));
        assert!(matches!(
            engine.post_now(&"u1".into(), "p2", t(10, 0)),
            Err(SchedulerError::PostNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn zero_providers_fails_without_publishing() {
        let engine = engine();
        let entry = engine.post_now(&"u1".into(), "p1", t(10, 0)).unwrap();
        assert_eq!(engine.dispatch(t(10, 0)).await.unwrap(), 1);
        let failed = engine.get_entry(&entry.id).unwrap();
        assert_eq!(failed.status, EntryStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("no publishing provider configured"));
        assert_eq!(failed.failed_at, Some(t(10, 0)));
    }
}
