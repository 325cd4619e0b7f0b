use std::sync::Mutex;

use chrono::{DateTime, Utc};
use postloop_core::ContentItem;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    error::Result,
    pool::{ContentPool, CycleTracker},
    types::{Schedule, Strategy},
};

/// Chooses which item a schedule publishes next.
///
/// No item repeats within a cycle. When the pool is exhausted the schedule
/// either starts a new cycle (`auto_reset`) or yields nothing.
pub struct StrategySelector {
    pool: ContentPool,
    cycles: CycleTracker,
    rng: Mutex<StdRng>,
}

impl StrategySelector {
    pub fn new(pool: ContentPool, cycles: CycleTracker) -> Self {
        Self::with_rng(pool, cycles, StdRng::from_os_rng())
    }

    /// Deterministic RANDOM picks, for tests and reproducible runs.
    pub fn with_seed(pool: ContentPool, cycles: CycleTracker, seed: u64) -> Self {
        Self::with_rng(pool, cycles, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pool: ContentPool, cycles: CycleTracker, rng: StdRng) -> Self {
        Self {
            pool,
            cycles,
            rng: Mutex::new(rng),
        }
    }

    /// The next item for `schedule`, or `None` when there is nothing to post.
    ///
    /// May reset the cycle; `schedule` is updated in place when it does.
    pub fn select(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Result<Option<ContentItem>> {
        let pool = self.pool.eligible_items(schedule)?;
        if pool.is_empty() {
            debug!(schedule_id = %schedule.id, "content pool is empty");
            return Ok(None);
        }

        let posted = self.pool.posted_item_ids(schedule)?;
        let unposted: Vec<ContentItem> = pool
            .iter()
            .filter(|item| !posted.contains(&item.id))
            .cloned()
            .collect();

        let candidates = if !unposted.is_empty() {
            unposted
        } else if schedule.auto_reset {
            info!(
                schedule_id = %schedule.id,
                pool = pool.len(),
                "every post published this cycle; starting a new one"
            );
            self.cycles.reset(schedule, now)?;
            pool
        } else {
            debug!(schedule_id = %schedule.id, pool = pool.len(), "pool exhausted, no auto reset");
            return Ok(None);
        };

        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            pick(schedule.strategy, &candidates, &mut *rng).cloned()
        };
        if let Some(item) = &picked {
            debug!(
                schedule_id = %schedule.id,
                post_id = %item.id,
                strategy = %schedule.strategy,
                candidates = candidates.len(),
                "post selected"
            );
        }
        Ok(picked)
    }
}

/// Apply `strategy` to a candidate list. `None` only for an empty list.
///
/// Creation-time ties are broken by id so the ordered strategies are total.
pub fn pick<'a, R: Rng>(
    strategy: Strategy,
    candidates: &'a [ContentItem],
    rng: &mut R,
) -> Option<&'a ContentItem> {
    match strategy {
        Strategy::Random => {
            if candidates.is_empty() {
                None
            } else {
                candidates.get(rng.random_range(0..candidates.len()))
            }
        }
        Strategy::NewestFirst => candidates
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id))),
        Strategy::OldestFirst => candidates
            .iter()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))),
    }
}
