use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    lock::{lock_key, ScheduleLock},
    recurrence::compute_next_run,
    store::Store,
    strategy::StrategySelector,
    types::{DispatchEntry, Schedule},
};

/// Turns due schedule occurrences into PENDING dispatch entries.
pub struct EntryGenerator {
    store: Store,
    selector: Arc<StrategySelector>,
    lock: Arc<dyn ScheduleLock>,
}

impl EntryGenerator {
    pub fn new(store: Store, selector: Arc<StrategySelector>, lock: Arc<dyn ScheduleLock>) -> Self {
        Self {
            store,
            selector,
            lock,
        }
    }

    /// Create one entry per active schedule whose `next_run <= now`.
    ///
    /// Every due schedule has its `next_run` moved past `now`, whether or not
    /// an entry was created. Returns the number of entries created.
    pub fn generate_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_schedules(now)?;
        let mut created = 0;

        for mut schedule in due {
            let Some(_guard) = self.lock.try_acquire(&lock_key("generate", &schedule.id)) else {
                debug!(schedule_id = %schedule.id, "schedule busy; skipped");
                continue;
            };
            match self.generate_one(&mut schedule, now) {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!(schedule_id = %schedule.id, "entry generation failed: {e}"),
            }
        }

        if created > 0 {
            info!(count = created, "dispatch entries generated");
        }
        Ok(created)
    }

    fn generate_one(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Result<bool> {
        let outcome = self.enqueue(schedule, now);
        let next = compute_next_run(&schedule.rule, &schedule.timezone, now);
        self.store.set_next_run(&schedule.id, next, now)?;
        debug!(schedule_id = %schedule.id, next_run = ?next, "schedule advanced");

        outcome
    }

    fn enqueue(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Result<bool> {
        let Some(occurrence) = schedule.next_run else {
            return Ok(false);
        };
        let Some(item) = self.selector.select(schedule, now)? else {
            info!(
                schedule_id = %schedule.id,
                occurrence = %occurrence,
                "nothing left to post; occurrence skipped"
            );
            return Ok(false);
        };

        let entry = DispatchEntry::pending(
            Some(schedule.id.clone()),
            &item.id,
            &schedule.user_id,
            occurrence,
            now,
        );
        let inserted = self.store.insert_entry(&entry)?;
        if inserted {
            info!(
                schedule_id = %schedule.id,
                entry_id = %entry.id,
                post_id = %item.id,
                scheduled_at = %occurrence,
                "dispatch entry created"
            );
        } else {
            debug!(schedule_id = %schedule.id, scheduled_at = %occurrence, "occurrence already has an entry");
        }
        Ok(inserted)
    }
}
