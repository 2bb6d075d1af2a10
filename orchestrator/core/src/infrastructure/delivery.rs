// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-flight work tracking.
//!
//! Counts scheduled-but-unfinished units of work (bus deliveries, agent
//! message handling) and lets callers await the moment the count drops to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct InFlightTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl InFlightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of work; it finishes when the guard is dropped.
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once no work is in flight.
    pub async fn wait_idle(&self) {
        self.wait_until(0).await
    }

    /// Resolve once at most `remaining` units are in flight.
    pub async fn wait_until(&self, remaining: usize) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) <= remaining {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let tracker = InFlightTracker::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.wait_idle())
            .await
            .expect("idle tracker should not block");
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_guards() {
        let tracker = InFlightTracker::new();
        let guard = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.in_flight(), 2);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_tolerates_remaining_guards() {
        let tracker = InFlightTracker::new();
        let own = tracker.begin();
        let other = tracker.begin();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_until(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(other);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish with one guard left")
            .unwrap();
        assert_eq!(tracker.in_flight(), 1);
        drop(own);
    }
}
