use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use postloop_core::UserId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::{
    db::{fmt_ts, init_db, parse_opt_ts, parse_ts},
    error::{Result, SchedulerError},
    types::{DispatchEntry, EntryStatus, Schedule},
};

const SCHEDULE_COLUMNS: &str = "id, user_id, name, strategy, scope, rule, timezone, next_run,
     is_active, auto_reset, reset_count, last_reset_at, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, schedule_id, post_id, user_id, scheduled_at, status, posted_at,
     error_message, attempts, failed_at, created_at, updated_at";

/// SQLite persistence for schedules, their selected items and dispatch entries.
///
/// Cloning is cheap; clones share one connection. The lock is never held
/// across an `.await`.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Raw schedule row before enum and timestamp decoding.
struct ScheduleRow {
    id: String,
    user_id: String,
    name: String,
    strategy: String,
    scope: String,
    rule: String,
    timezone: String,
    next_run: Option<String>,
    is_active: bool,
    auto_reset: bool,
    reset_count: u32,
    last_reset_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            strategy: row.get(3)?,
            scope: row.get(4)?,
            rule: row.get(5)?,
            timezone: row.get(6)?,
            next_run: row.get(7)?,
            is_active: row.get(8)?,
            auto_reset: row.get(9)?,
            reset_count: row.get(10)?,
            last_reset_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn decode(self) -> Result<Schedule> {
        Ok(Schedule {
            strategy: self.strategy.parse().map_err(SchedulerError::Corrupt)?,
            scope: self.scope.parse().map_err(SchedulerError::Corrupt)?,
            next_run: parse_opt_ts(self.next_run)?,
            last_reset_at: parse_opt_ts(self.last_reset_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            user_id: UserId(self.user_id),
            name: self.name,
            rule: self.rule,
            timezone: self.timezone,
            is_active: self.is_active,
            auto_reset: self.auto_reset,
            reset_count: self.reset_count,
        })
    }
}

struct EntryRow {
    id: String,
    schedule_id: Option<String>,
    post_id: String,
    user_id: String,
    scheduled_at: String,
    status: String,
    posted_at: Option<String>,
    error_message: Option<String>,
    attempts: u32,
    failed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            schedule_id: row.get(1)?,
            post_id: row.get(2)?,
            user_id: row.get(3)?,
            scheduled_at: row.get(4)?,
            status: row.get(5)?,
            posted_at: row.get(6)?,
            error_message: row.get(7)?,
            attempts: row.get(8)?,
            failed_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn decode(self) -> Result<DispatchEntry> {
        Ok(DispatchEntry {
            status: self.status.parse().map_err(SchedulerError::Corrupt)?,
            scheduled_at: parse_ts(&self.scheduled_at)?,
            posted_at: parse_opt_ts(self.posted_at)?,
            failed_at: parse_opt_ts(self.failed_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            schedule_id: self.schedule_id,
            post_id: self.post_id,
            user_id: UserId(self.user_id),
            error_message: self.error_message,
            attempts: self.attempts,
        })
    }
}

impl Store {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fresh in-memory database with foreign keys enforced.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::new(conn)
    }

    pub(crate) fn db(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- schedules -----------------------------------------------------------

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.db().execute(
            &format!(
                "INSERT INTO schedules ({SCHEDULE_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"
            ),
            params![
                schedule.id,
                schedule.user_id.as_str(),
                schedule.name,
                schedule.strategy.to_string(),
                schedule.scope.to_string(),
                schedule.rule,
                schedule.timezone,
                schedule.next_run.map(fmt_ts),
                schedule.is_active,
                schedule.auto_reset,
                schedule.reset_count,
                schedule.last_reset_at.map(fmt_ts),
                fmt_ts(schedule.created_at),
                fmt_ts(schedule.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let row = self
            .db()
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [id],
                ScheduleRow::from_row,
            )
            .optional()?;
        row.map(ScheduleRow::decode).transpose()
    }

    /// Like [`Store::get_schedule`] but missing rows are an error.
    pub fn require_schedule(&self, id: &str) -> Result<Schedule> {
        self.get_schedule(id)?
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })
    }

    /// All schedules owned by `user`, oldest first.
    pub fn list_schedules(&self, user: &UserId) -> Result<Vec<Schedule>> {
        let rows: Vec<ScheduleRow> = {
            let db = self.db();
            let mut stmt = db.prepare_cached(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE user_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([user.as_str()], ScheduleRow::from_row)?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        rows.into_iter().map(ScheduleRow::decode).collect()
    }

    /// Active schedules with `next_run <= now`, most overdue first.
    pub fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows: Vec<ScheduleRow> = {
            let db = self.db();
            let mut stmt = db.prepare_cached(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE is_active = 1 AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run, id"
            ))?;
            let rows = stmt
                .query_map([fmt_ts(now)], ScheduleRow::from_row)?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        rows.into_iter().map(ScheduleRow::decode).collect()
    }

    pub fn set_next_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db().execute(
            "UPDATE schedules SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
            params![next_run.map(fmt_ts), fmt_ts(now), id],
        )?;
        Ok(())
    }

    /// Start a new cycle: bump `reset_count` and stamp `last_reset_at`.
    /// Returns the new reset count.
    pub fn record_reset(&self, id: &str, now: DateTime<Utc>) -> Result<u32> {
        let count = self
            .db()
            .query_row(
                "UPDATE schedules
                 SET reset_count = reset_count + 1, last_reset_at = ?1, updated_at = ?1
                 WHERE id = ?2
                 RETURNING reset_count",
                params![fmt_ts(now), id],
                |row| row.get(0),
            )
            .optional()?;
        count.ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })
    }

    pub fn set_active(
        &self,
        id: &str,
        active: bool,
        next_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let n = self.db().execute(
            "UPDATE schedules SET is_active = ?1, next_run = ?2, updated_at = ?3 WHERE id = ?4",
            params![active, next_run.map(fmt_ts), fmt_ts(now), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Delete a schedule; its entries and selected items go with it.
    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        let n = self.db().execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Replace the curated pool of a schedule.
    pub fn set_selected_items(&self, schedule_id: &str, post_ids: &[String]) -> Result<()> {
        let mut db = self.db();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM schedule_items WHERE schedule_id = ?1", [schedule_id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO schedule_items (schedule_id, post_id) VALUES (?1, ?2)",
            )?;
            for post_id in post_ids {
                stmt.execute(params![schedule_id, post_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn selected_item_ids(&self, schedule_id: &str) -> Result<Vec<String>> {
        let db = self.db();
        let mut stmt = db.prepare_cached(
            "SELECT post_id FROM schedule_items WHERE schedule_id = ?1 ORDER BY post_id",
        )?;
        let ids = stmt
            .query_map([schedule_id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    // --- dispatch entries ----------------------------------------------------

    /// Insert `entry`. Returns `false` when the schedule already has an entry
    /// for that occurrence.
    pub fn insert_entry(&self, entry: &DispatchEntry) -> Result<bool> {
        let n = self.db().execute(
            &format!(
                "INSERT OR IGNORE INTO dispatch_entries ({ENTRY_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"
            ),
            params![
                entry.id,
                entry.schedule_id,
                entry.post_id,
                entry.user_id.as_str(),
                fmt_ts(entry.scheduled_at),
                entry.status.as_str(),
                entry.posted_at.map(fmt_ts),
                entry.error_message,
                entry.attempts,
                entry.failed_at.map(fmt_ts),
                fmt_ts(entry.created_at),
                fmt_ts(entry.updated_at),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn get_entry(&self, id: &str) -> Result<Option<DispatchEntry>> {
        let row = self
            .db()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM dispatch_entries WHERE id = ?1"),
                [id],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::decode).transpose()
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<DispatchEntry>> {
        let rows: Vec<EntryRow> = {
            let db = self.db();
            let mut stmt = db.prepare_cached(sql)?;
            let rows = stmt
                .query_map(args, EntryRow::from_row)?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        rows.into_iter().map(EntryRow::decode).collect()
    }

    /// PENDING entries with `scheduled_at <= until`, oldest first.
    pub fn pending_due(&self, until: DateTime<Utc>, limit: usize) -> Result<Vec<DispatchEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM dispatch_entries
                 WHERE status = 'pending' AND scheduled_at <= ?1
                 ORDER BY scheduled_at, id LIMIT ?2"
            ),
            params![fmt_ts(until), limit as i64],
        )
    }

    /// FAILED entries whose first failure is at or after `since`, oldest first.
    pub fn failed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<DispatchEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM dispatch_entries
                 WHERE status = 'failed' AND failed_at >= ?1
                 ORDER BY scheduled_at, id LIMIT ?2"
            ),
            params![fmt_ts(since), limit as i64],
        )
    }

    /// Every entry of a schedule, newest occurrence first.
    pub fn entries_for_schedule(&self, schedule_id: &str) -> Result<Vec<DispatchEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM dispatch_entries
                 WHERE schedule_id = ?1 ORDER BY scheduled_at DESC, id"
            ),
            [schedule_id],
        )
    }

    /// (post_id, created_at) of every POSTED entry of a schedule.
    pub(crate) fn posted_rows(&self, schedule_id: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rows: Vec<(String, String)> = {
            let db = self.db();
            let mut stmt = db.prepare_cached(
                "SELECT post_id, created_at FROM dispatch_entries
                 WHERE schedule_id = ?1 AND status = 'posted'",
            )?;
            let rows = stmt
                .query_map([schedule_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        rows.into_iter()
            .map(|(post_id, created_at)| Ok((post_id, parse_ts(&created_at)?)))
            .collect()
    }

    /// Transition `expected` → POSTED. Returns `false` if the entry was no
    /// longer in `expected`.
    pub fn mark_posted(
        &self,
        id: &str,
        expected: EntryStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.db().execute(
            "UPDATE dispatch_entries
             SET status = 'posted', posted_at = ?1, error_message = ?2,
                 attempts = attempts + 1, updated_at = ?1
             WHERE id = ?3 AND status = ?4",
            params![fmt_ts(now), error_message, id, expected.as_str()],
        )?;
        Ok(n > 0)
    }

    /// Transition `expected` → FAILED. `failed_at` keeps its first value.
    pub fn mark_failed(
        &self,
        id: &str,
        expected: EntryStatus,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.db().execute(
            "UPDATE dispatch_entries
             SET status = 'failed', error_message = ?1, attempts = attempts + 1,
                 failed_at = COALESCE(failed_at, ?2), updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![error_message, fmt_ts(now), id, expected.as_str()],
        )?;
        Ok(n > 0)
    }

    /// PENDING → CANCELED.
    pub fn cancel_entry(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.db().execute(
            "UPDATE dispatch_entries SET status = 'canceled', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![fmt_ts(now), id],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use postloop_core::ContentItem;

    use super::*;
    use crate::types::{Scope, Strategy};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn schedule(id: &str, next_run: Option<DateTime<Utc>>) -> Schedule {
        let now = at("2026-03-01T00:00:00Z");
        Schedule {
            id: id.into(),
            user_id: "u1".into(),
            name: id.into(),
            strategy: Strategy::OldestFirst,
            scope: Scope::All,
            rule: "FREQ=HOURLY".into(),
            timezone: "UTC".into(),
            next_run,
            is_active: true,
            auto_reset: false,
            reset_count: 0,
            last_reset_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn seed_post(store: &Store, id: &str) {
        store
            .insert_item(&ContentItem {
                id: id.into(),
                user_id: "u1".into(),
                caption: None,
                assets: vec![],
                texts: Default::default(),
                created_at: at("2026-01-01T00:00:00Z"),
            })
            .unwrap();
    }

    #[test]
    fn schedule_round_trips_and_due_query_filters() {
        let store = Store::open_in_memory().unwrap();
        let now = at("2026-03-02T10:00:00Z");
        store.insert_schedule(&schedule("due", Some(now - Duration::minutes(1)))).unwrap();
        store.insert_schedule(&schedule("later", Some(now + Duration::minutes(1)))).unwrap();
        store.insert_schedule(&schedule("idle", None)).unwrap();
        let mut paused = schedule("paused", Some(now - Duration::hours(1)));
        paused.is_active = false;
        store.insert_schedule(&paused).unwrap();

        let due: Vec<String> = store.due_schedules(now).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(due, vec!["due".to_string()]);
        assert_eq!(store.get_schedule("later").unwrap().unwrap(), schedule("later", Some(now + Duration::minutes(1))));
        assert_eq!(store.list_schedules(&"u1".into()).unwrap().len(), 4);
    }

    #[test]
    fn record_reset_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        store.insert_schedule(&schedule("s", None)).unwrap();
        let now = at("2026-03-02T10:00:00Z");
        assert_eq!(store.record_reset("s", now).unwrap(), 1);
        assert_eq!(store.record_reset("s", now + Duration::hours(1)).unwrap(), 2);
        let s = store.get_schedule("s").unwrap().unwrap();
        assert_eq!(s.last_reset_at, Some(now + Duration::hours(1)));
        assert!(matches!(
            store.record_reset("missing", now),
            Err(SchedulerError::ScheduleNotFound { .. })
        ));
    }

    #[test]
    fn one_entry_per_occurrence() {
        let store = Store::open_in_memory().unwrap();
        seed_post(&store, "p1");
        store.insert_schedule(&schedule("s", None)).unwrap();
        let due = at("2026-03-02T10:00:00Z");
        let first = DispatchEntry::pending(Some("s".into()), "p1", &"u1".into(), due, due);
        let second = DispatchEntry::pending(Some("s".into()), "p1", &"u1".into(), due, due);
        assert!(store.insert_entry(&first).unwrap());
        assert!(!store.insert_entry(&second).unwrap());

        // Ad hoc entries are not constrained.
        let adhoc_a = DispatchEntry::pending(None, "p1", &"u1".into(), due, due);
        let adhoc_b = DispatchEntry::pending(None, "p1", &"u1".into(), due, due);
        assert!(store.insert_entry(&adhoc_a).unwrap());
        assert!(store.insert_entry(&adhoc_b).unwrap());
    }

    #[test]
    fn transitions_are_guarded_on_current_status() {
        let store = Store::open_in_memory().unwrap();
        seed_post(&store, "p1");
        let t0 = at("2026-03-02T10:00:00Z");
        let entry = DispatchEntry::pending(None, "p1", &"u1".into(), t0, t0);
        store.insert_entry(&entry).unwrap();

        assert!(store.mark_failed(&entry.id, EntryStatus::Pending, "telegram: down", t0).unwrap());
        // Already FAILED, so a second PENDING-guarded update is a no-op.
        assert!(!store.mark_failed(&entry.id, EntryStatus::Pending, "x", t0).unwrap());
        assert!(!store.cancel_entry(&entry.id, t0).unwrap());

        let t1 = t0 + Duration::hours(1);
        assert!(store.mark_failed(&entry.id, EntryStatus::Failed, "telegram: still down", t1).unwrap());
        let failed = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.failed_at, Some(t0));

        assert!(store.mark_posted(&entry.id, EntryStatus::Failed, None, t1).unwrap());
        let posted = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(posted.status, EntryStatus::Posted);
        assert_eq!(posted.posted_at, Some(t1));
        assert_eq!(posted.error_message, None);
        assert_eq!(posted.attempts, 3);
    }

    #[test]
    fn deleting_schedule_cascades() {
        let store = Store::open_in_memory().unwrap();
        seed_post(&store, "p1");
        store.insert_schedule(&schedule("s", None)).unwrap();
        store.set_selected_items("s", &["p1".to_string()]).unwrap();
        let t0 = at("2026-03-02T10:00:00Z");
        let entry = DispatchEntry::pending(Some("s".into()), "p1", &"u1".into(), t0, t0);
        store.insert_entry(&entry).unwrap();

        store.delete_schedule("s").unwrap();
        assert!(store.get_entry(&entry.id).unwrap().is_none());
        assert!(store.selected_item_ids("s").unwrap().is_empty());
        assert!(store.delete_schedule("s").is_err());
    }
}
