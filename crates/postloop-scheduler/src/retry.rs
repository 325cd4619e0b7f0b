use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    dispatch::{log_outcome, EntryPublisher},
    error::Result,
    lock::{lock_key, ScheduleLock},
    store::Store,
    types::EntryStatus,
};

/// Re-attempts FAILED entries while their first failure is recent.
pub struct RetryManager {
    store: Store,
    publisher: Arc<EntryPublisher>,
    lock: Arc<dyn ScheduleLock>,
}

impl RetryManager {
    pub fn new(store: Store, publisher: Arc<EntryPublisher>, lock: Arc<dyn ScheduleLock>) -> Self {
        Self {
            store,
            publisher,
            lock,
        }
    }

    /// Retry up to `batch_limit` entries that first failed within `window`
    /// of `now`. Entries that fail again stay FAILED and age out of the
    /// window. Returns the number retried.
    pub async fn retry_recent(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        batch_limit: usize,
    ) -> Result<usize> {
        let candidates = self.store.failed_since(now - window, batch_limit)?;
        let mut retried = 0;

        for entry in candidates {
            let Some(_guard) = self.lock.try_acquire(&lock_key("retry", &entry.id)) else {
                debug!(entry_id = %entry.id, "entry busy; skipped");
                continue;
            };
            debug!(entry_id = %entry.id, attempts = entry.attempts, "retrying failed entry");

            let attempt = match self.publisher.attempt(&entry).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(entry_id = %entry.id, "retry failed: {e}");
                    continue;
                }
            };
            match self
                .publisher
                .record(&self.store, &entry, EntryStatus::Failed, &attempt, now)
            {
                Ok(true) => {
                    retried += 1;
                    log_outcome(&entry, &attempt, "retry");
                }
                Ok(false) => {}
                Err(e) => warn!(entry_id = %entry.id, "could not record retry outcome: {e}"),
            }
        }

        if retried > 0 {
            info!(count = retried, "failed entries retried");
        }
        Ok(retried)
    }
}
