//! `postloop-scheduler` — recurring content scheduling with SQLite persistence.
//!
//! # Overview
//!
//! A [`Schedule`] pairs a recurrence rule with a pool of the user's posts.
//! Each invocation of [`SchedulerEngine::run_once`] runs three phases:
//!
//! | Phase    | Component                          | Effect                                            |
//! |----------|------------------------------------|---------------------------------------------------|
//! | generate | [`generator::EntryGenerator`]      | due schedule → one PENDING entry, `next_run` advanced |
//! | dispatch | [`dispatch::DispatchWorker`]       | PENDING entries in the lookahead window → providers |
//! | retry    | [`retry::RetryManager`]            | recently FAILED entries → providers again         |
//!
//! Posts never repeat within a cycle. Once every post of the pool has been
//! published the schedule either starts a new cycle (`auto_reset`) or skips
//! its occurrences until reset by hand.

pub mod content;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gate;
pub mod generator;
pub mod lock;
pub mod pool;
pub mod recurrence;
pub mod retry;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod types;

pub use content::ContentStore;
pub use engine::{EngineBuilder, EngineSettings, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use gate::{IntervalGate, NoGate, RateGate};
pub use lock::{LocalLock, LockGuard, ScheduleLock};
pub use pool::{ContentPool, CycleTracker, EntryHistory, HistoryRecord};
pub use recurrence::{compute_next_run, Recurrence};
pub use store::Store;
pub use strategy::StrategySelector;
pub use types::{
    DispatchEntry, EntryStatus, NewSchedule, RunReport, Schedule, ScheduleStats, Scope, Strategy,
};
