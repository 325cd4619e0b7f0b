//! Process-wide pacing of outbound provider calls.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// A shared budget every provider call must pass through.
#[async_trait]
pub trait RateGate: Send + Sync {
    /// Wait until the caller may start one provider call.
    async fn acquire(&self);
}

/// Fixed minimum spacing between the *starts* of consecutive calls.
///
/// Callers reserve a slot under a short lock and then sleep outside it, so a
/// slow provider call never blocks the next caller beyond its own slot.
pub struct IntervalGate {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    fn reserve(&self) -> Instant {
        let mut next = self.next_slot.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let slot = next.map_or(now, |n| n.max(now));
        *next = Some(slot + self.spacing);
        slot
    }
}

#[async_trait]
impl RateGate for IntervalGate {
    async fn acquire(&self) {
        let slot = self.reserve();
        tokio::time::sleep_until(slot).await;
    }
}

/// Gate that never waits.
pub struct NoGate;

#[async_trait]
impl RateGate for NoGate {
    async fn acquire(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn assert_near(actual: Duration, expected: Duration) {
        let slack = Duration::from_millis(5);
        assert!(
            actual >= expected && actual <= expected + slack,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let gate = IntervalGate::new(Duration::from_millis(500));
        let start = Instant::now();
        gate.acquire().await;
        assert_near(start.elapsed(), Duration::ZERO);
        gate.acquire().await;
        gate.acquire().await;
        assert_near(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_is_not_banked() {
        let gate = IntervalGate::new(Duration::from_millis(500));
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        assert_near(before.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_get_distinct_slots() {
        let gate = Arc::new(IntervalGate::new(Duration::from_millis(100)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.acquire().await;
                    start.elapsed()
                })
            })
            .collect();
        let mut waits = Vec::new();
        for h in handles {
            waits.push(h.await.unwrap());
        }
        waits.sort();
        for (i, wait) in waits.into_iter().enumerate() {
            assert_near(wait, Duration::from_millis(100 * i as u64));
        }
    }
}
