//! Mutual exclusion for per-schedule and per-entry work.
//!
//! Keys look like `"generate:<schedule id>"` or `"dispatch:<entry id>"`. A key
//! that is already held is skipped for the current invocation rather than
//! waited on. Cross-process exclusion needs a shared implementation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Held lock; releases its key on drop.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub trait ScheduleLock: Send + Sync {
    /// Take `key` if nobody holds it.
    fn try_acquire(&self, key: &str) -> Option<LockGuard>;
}

pub fn lock_key(phase: &str, id: &str) -> String {
    format!("{phase}:{id}")
}

/// In-process key set.
#[derive(Clone, Default)]
pub struct LocalLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleLock for LocalLock {
    fn try_acquire(&self, key: &str) -> Option<LockGuard> {
        let inserted = self
            .held
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string());
        if !inserted {
            return None;
        }
        let held = Arc::clone(&self.held);
        let key = key.to_string();
        Some(LockGuard::new(move || {
            held.lock().unwrap_or_else(|p| p.into_inner()).remove(&key);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_keys_are_refused_until_released() {
        let lock = LocalLock::new();
        let key = lock_key("dispatch", "e1");
        let guard = lock.try_acquire(&key).expect("first acquire");
        assert!(lock.try_acquire(&key).is_none());
        assert!(lock.try_acquire(&lock_key("retry", "e1")).is_some());
        drop(guard);
        assert!(lock.try_acquire(&key).is_some());
    }
}
