//! Tracking of spawned pipeline tasks for the shutdown drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts extractor and request tasks that have not finished.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    active: Arc<AtomicUsize>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; it counts as active until the guard is dropped.
    pub fn enter(&self) -> TaskGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        TaskGuard(Arc::clone(&self.active))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no tracked task is running, or `timeout` passes.
    ///
    /// Returns whether everything finished.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(active = self.active(), "Drain period over, abandoning pipeline tasks");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

/// Marks one task active; released on drop, panics included.
#[derive(Debug)]
pub struct TaskGuard(Arc<AtomicUsize>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_guards() {
        let tracker = TaskTracker::new();
        let guard = tracker.enter();
        let second = tracker.clone().enter();
        assert_eq!(tracker.active(), 2);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(guard);
            drop(second);
        });
        assert!(tracker.drain(Duration::from_secs(1)).await);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_timeout() {
        let tracker = TaskTracker::new();
        let _guard = tracker.enter();
        assert!(!tracker.drain(Duration::from_millis(50)).await);
    }
}
