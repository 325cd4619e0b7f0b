//! A schedule's eligible content and its cycle bookkeeping.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postloop_core::ContentItem;
use tracing::{info, warn};

use crate::{
    content::ContentStore,
    error::Result,
    store::Store,
    types::{Schedule, Scope},
};

/// One POSTED entry of a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub post_id: String,
    pub created_at: DateTime<Utc>,
}

/// Publish history of schedules.
pub trait EntryHistory: Send + Sync {
    /// Every POSTED entry ever recorded for `schedule_id`, resets included.
    fn posted_history(&self, schedule_id: &str) -> Result<Vec<HistoryRecord>>;
}

impl EntryHistory for Store {
    fn posted_history(&self, schedule_id: &str) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .posted_rows(schedule_id)?
            .into_iter()
            .map(|(post_id, created_at)| HistoryRecord { post_id, created_at })
            .collect())
    }
}

/// The exhausted set: ids posted in the current cycle.
///
/// Records created before `last_reset_at` belong to an earlier cycle.
pub fn posted_item_ids(
    history: &[HistoryRecord],
    last_reset_at: Option<DateTime<Utc>>,
) -> BTreeSet<String> {
    history
        .iter()
        .filter(|r| last_reset_at.map_or(true, |reset| r.created_at >= reset))
        .map(|r| r.post_id.clone())
        .collect()
}

/// Read-only view over the items a schedule may publish.
#[derive(Clone)]
pub struct ContentPool {
    content: Arc<dyn ContentStore>,
    history: Arc<dyn EntryHistory>,
    selections: Store,
}

impl ContentPool {
    pub fn new(content: Arc<dyn ContentStore>, history: Arc<dyn EntryHistory>, selections: Store) -> Self {
        Self {
            content,
            history,
            selections,
        }
    }

    /// ALL: the owner's items with a deliverable asset. SELECTED: the curated
    /// set, restricted to items the owner still owns.
    pub fn eligible_items(&self, schedule: &Schedule) -> Result<Vec<ContentItem>> {
        match schedule.scope {
            Scope::All => Ok(self
                .content
                .list_items(&schedule.user_id)?
                .into_iter()
                .filter(ContentItem::has_deliverable_asset)
                .collect()),
            Scope::Selected => {
                let mut items = Vec::new();
                for post_id in self.selections.selected_item_ids(&schedule.id)? {
                    match self.content.get_item(&post_id)? {
                        Some(item) if item.user_id == schedule.user_id => items.push(item),
                        Some(_) => warn!(
                            schedule_id = %schedule.id,
                            post_id = %post_id,
                            "selected post belongs to another user; ignored"
                        ),
                        None => {}
                    }
                }
                Ok(items)
            }
        }
    }

    pub fn posted_item_ids(&self, schedule: &Schedule) -> Result<BTreeSet<String>> {
        let history = self.history.posted_history(&schedule.id)?;
        Ok(posted_item_ids(&history, schedule.last_reset_at))
    }
}

/// Completes cycles by forgetting a schedule's publish history.
///
/// Entries are kept for audit; the new `last_reset_at` hides them from
/// [`posted_item_ids`].
#[derive(Clone)]
pub struct CycleTracker {
    store: Store,
}

impl CycleTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Start a new cycle and mirror the change into `schedule`.
    pub fn reset(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Result<()> {
        let count = self.store.record_reset(&schedule.id, now)?;
        schedule.reset_count = count;
        schedule.last_reset_at = Some(now);
        schedule.updated_at = now;
        info!(schedule_id = %schedule.id, reset_count = count, "content cycle reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn record(post_id: &str, created_at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            post_id: post_id.into(),
            created_at,
        }
    }

    #[test]
    fn history_before_reset_is_forgotten() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let history = vec![
            record("a", t0),
            record("b", t0 + Duration::hours(1)),
            record("a", t0 + Duration::hours(3)),
        ];

        let all_time = posted_item_ids(&history, None);
        assert_eq!(all_time, BTreeSet::from(["a".to_string(), "b".to_string()]));

        let since_reset = posted_item_ids(&history, Some(t0 + Duration::hours(2)));
        assert_eq!(since_reset, BTreeSet::from(["a".to_string()]));

        // A record stamped exactly at the reset instant counts for the new cycle.
        let boundary = posted_item_ids(&history, Some(t0 + Duration::hours(1)));
        assert!(boundary.contains("b"));
    }
}
