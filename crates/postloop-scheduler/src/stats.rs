use crate::{
    error::Result,
    pool::ContentPool,
    types::{Schedule, ScheduleStats},
};

/// Cycle progress for `schedule` against its current pool.
pub fn schedule_stats(pool: &ContentPool, schedule: &Schedule) -> Result<ScheduleStats> {
    let items = pool.eligible_items(schedule)?;
    let posted_ids = pool.posted_item_ids(schedule)?;
    let total = items.len();
    // Posts removed from the pool since publishing no longer count.
    let posted = items.iter().filter(|i| posted_ids.contains(&i.id)).count();
    Ok(summarize(schedule, total, posted))
}

fn summarize(schedule: &Schedule, total: usize, posted: usize) -> ScheduleStats {
    let remaining = total.saturating_sub(posted);
    let percent_complete = if total == 0 {
        0.0
    } else {
        posted as f64 * 100.0 / total as f64
    };
    ScheduleStats {
        schedule_id: schedule.id.clone(),
        total,
        posted,
        remaining,
        percent_complete,
        reset_count: schedule.reset_count,
        last_reset_at: schedule.last_reset_at,
        auto_reset: schedule.auto_reset,
        cycle_complete: total > 0 && remaining == 0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::{Scope, Strategy};

    fn schedule() -> Schedule {
        let now = Utc::now();
        Schedule {
            id: "s".into(),
            user_id: "u".into(),
            name: "s".into(),
            strategy: Strategy::Random,
            scope: Scope::All,
            rule: "FREQ=DAILY;BYHOUR=9".into(),
            timezone: "UTC".into(),
            next_run: None,
            is_active: true,
            auto_reset: true,
            reset_count: 2,
            last_reset_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentages_and_completion() {
        let s = schedule();
        let partial = summarize(&s, 4, 1);
        assert_eq!(partial.remaining, 3);
        assert!((partial.percent_complete - 25.0).abs() < f64::EPSILON);
        assert!(!partial.cycle_complete);
        assert_eq!(partial.reset_count, 2);

        let done = summarize(&s, 4, 4);
        assert!(done.cycle_complete);

        let empty = summarize(&s, 0, 0);
        assert_eq!(empty.percent_complete, 0.0);
        assert!(!empty.cycle_complete);
    }
}
