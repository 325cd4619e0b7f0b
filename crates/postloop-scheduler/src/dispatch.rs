use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use postloop_providers::ProviderRegistry;
use tracing::{debug, info, warn};

use crate::{
    content::ContentStore,
    error::Result,
    gate::RateGate,
    lock::{lock_key, ScheduleLock},
    store::Store,
    types::{DispatchEntry, EntryStatus},
};

/// Result of publishing one entry to every configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// At least one provider accepted the post. `failures` lists the rest.
    Posted { failures: Vec<String> },
    /// Nothing was published.
    Failed { reason: String },
}

impl Attempt {
    /// `"<provider>: <reason>"` items joined by `"; "`, or `None`.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Attempt::Posted { failures } if failures.is_empty() => None,
            Attempt::Posted { failures } => Some(failures.join("; ")),
            Attempt::Failed { reason } => Some(reason.clone()),
        }
    }
}

/// Publishes an entry's post through every provider its owner configured,
/// pacing each call through the shared gate.
pub struct EntryPublisher {
    content: Arc<dyn ContentStore>,
    registry: Arc<ProviderRegistry>,
    gate: Arc<dyn RateGate>,
}

impl EntryPublisher {
    pub fn new(
        content: Arc<dyn ContentStore>,
        registry: Arc<ProviderRegistry>,
        gate: Arc<dyn RateGate>,
    ) -> Self {
        Self {
            content,
            registry,
            gate,
        }
    }

    /// Publish `entry` and report the combined outcome.
    ///
    /// Store errors are returned; everything the providers or the entry's own
    /// data get wrong is an [`Attempt::Failed`].
    pub async fn attempt(&self, entry: &DispatchEntry) -> Result<Attempt> {
        let Some(item) = self.content.get_item(&entry.post_id)? else {
            return Ok(Attempt::Failed {
                reason: format!("post {} not found", entry.post_id),
            });
        };
        if item.user_id != entry.user_id {
            return Ok(Attempt::Failed {
                reason: format!("post {} is not owned by {}", item.id, entry.user_id),
            });
        }

        let kinds = self.registry.configured_for(&entry.user_id)?;
        if kinds.is_empty() {
            return Ok(Attempt::Failed {
                reason: "no publishing provider configured".to_string(),
            });
        }

        let mut published = 0;
        let mut failures = Vec::new();
        for kind in kinds {
            self.gate.acquire().await;
            match self.registry.publish(kind, &entry.user_id, &item).await {
                Ok(receipt) => {
                    published += 1;
                    info!(
                        entry_id = %entry.id,
                        provider = %kind,
                        remote_id = ?receipt.remote_id,
                        "published"
                    );
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, provider = %kind, "publish failed: {e}");
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }

        Ok(if published > 0 {
            Attempt::Posted { failures }
        } else {
            Attempt::Failed {
                reason: failures.join("; "),
            }
        })
    }

    /// Persist `attempt` as a transition out of `expected`. Returns whether the
    /// entry was still in `expected`.
    pub fn record(
        &self,
        store: &Store,
        entry: &DispatchEntry,
        expected: EntryStatus,
        attempt: &Attempt,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let message = attempt.error_message();
        let applied = match attempt {
            Attempt::Posted { .. } => store.mark_posted(&entry.id, expected, message.as_deref(), now)?,
            Attempt::Failed { .. } => {
                store.mark_failed(&entry.id, expected, message.as_deref().unwrap_or_default(), now)?
            }
        };
        if !applied {
            warn!(entry_id = %entry.id, expected = %expected, "entry changed status mid-dispatch; outcome dropped");
        }
        Ok(applied)
    }
}

/// Publishes PENDING entries as they come due.
pub struct DispatchWorker {
    store: Store,
    publisher: Arc<EntryPublisher>,
    lock: Arc<dyn ScheduleLock>,
}

impl DispatchWorker {
    pub fn new(store: Store, publisher: Arc<EntryPublisher>, lock: Arc<dyn ScheduleLock>) -> Self {
        Self {
            store,
            publisher,
            lock,
        }
    }

    /// Process up to `batch_limit` PENDING entries scheduled no later than
    /// `now + lookahead`, oldest first. Returns the number processed.
    pub async fn dispatch_due(
        &self,
        now: DateTime<Utc>,
        lookahead: Duration,
        batch_limit: usize,
    ) -> Result<usize> {
        let due = self.store.pending_due(now + lookahead, batch_limit)?;
        let mut processed = 0;

        for entry in due {
            let Some(_guard) = self.lock.try_acquire(&lock_key("dispatch", &entry.id)) else {
                debug!(entry_id = %entry.id, "entry busy; skipped");
                continue;
            };
            let attempt = match self.publisher.attempt(&entry).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(entry_id = %entry.id, "dispatch failed: {e}");
                    continue;
                }
            };
            match self
                .publisher
                .record(&self.store, &entry, EntryStatus::Pending, &attempt, now)
            {
                Ok(true) => {
                    processed += 1;
                    log_outcome(&entry, &attempt, "dispatch");
                }
                Ok(false) => {}
                Err(e) => warn!(entry_id = %entry.id, "could not record dispatch outcome: {e}"),
            }
        }

        if processed > 0 {
            info!(count = processed, "dispatch entries processed");
        }
        Ok(processed)
    }
}

pub(crate) fn log_outcome(entry: &DispatchEntry, attempt: &Attempt, phase: &str) {
    match attempt {
        Attempt::Posted { failures } if failures.is_empty() => {
            info!(entry_id = %entry.id, post_id = %entry.post_id, phase, "entry posted");
        }
        Attempt::Posted { failures } => info!(
            entry_id = %entry.id,
            post_id = %entry.post_id,
            phase,
            failed_providers = failures.len(),
            "entry posted with partial failures"
        ),
        Attempt::Failed { reason } => warn!(
            entry_id = %entry.id,
            post_id = %entry.post_id,
            phase,
            "entry failed: {reason}"
        ),
    }
}
