//! Drain barrier for in-flight bet acceptances.
//!
//! At round closure the scheduler must wait for acceptances that began
//! before the window closed, bounded by a ceiling. The wait is
//! notification-driven with a deadline: bounded-wait-then-proceed,
//! without polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct InflightGate {
    count: AtomicU64,
    drained: Notify,
}

impl InflightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight operation. The returned guard must be held
    /// for the operation's full duration; dropping it wakes any drain
    /// waiter when the count reaches zero.
    pub fn enter(&self) -> InflightGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        InflightGuard { gate: self }
    }

    pub fn in_flight(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until no operations are in flight, or until `ceiling`
    /// elapses. Returns `true` if fully drained within the ceiling.
    pub async fn drain(&self, ceiling: Duration) -> bool {
        let deadline = Instant::now() + ceiling;
        loop {
            // Arm the notification before re-checking the count, so a
            // decrement between check and wait cannot be missed.
            let notified = self.drained.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }
}

pub struct InflightGuard<'a> {
    gate: &'a InflightGate,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.gate.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.gate.drained.notify_waiters();
        }
    }
}
