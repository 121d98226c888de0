//! Deduplicating work queue with per-key serialization.
//!
//! A key is in at most one of three places:
//! - queued: waiting for a worker (also tracked in `dirty`)
//! - processing: handed to a worker and not yet marked `done`
//! - dirty while processing: re-added during a run, queued again on `done`
//!
//! This is what guarantees a single in-flight reconcile per object.

use crate::resource::ObjectKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Work queue shared by a controller's event pump and workers
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a key. Duplicates of a waiting key collapse into one entry.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Picked up again by `done`.
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a key after `delay` without blocking the caller.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as finished; requeues it if it was re-added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);

        if !state.shutting_down && state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Record a failed run and return how many failures preceded it.
    pub async fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = self.state.lock().await;
        let failures = state.failures.entry(key.clone()).or_insert(0);
        let previous = *failures;
        *failures += 1;
        previous
    }

    /// Reset the failure count of a key after a successful run.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn failures(&self, key: &ObjectKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of keys waiting for a worker.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }

    /// Stop handing out keys. Waiting keys are dropped; running keys finish.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        queue.add(key("a")).await;
        queue.add(key("b")).await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;

        let first = queue.next().await.unwrap();
        assert_eq!(queue.in_flight().await, 1);

        // Re-added while processing: parked, not queued.
        queue.add(key("a")).await;
        assert!(queue.is_empty().await);

        queue.done(&first).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        let k = queue.next().await.unwrap();
        queue.done(&k).await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_failure_counting() {
        let queue = WorkQueue::new();
        let k = key("a");

        assert_eq!(queue.record_failure(&k).await, 0);
        assert_eq!(queue.record_failure(&k).await, 1);
        assert_eq!(queue.failures(&k).await, 2);

        queue.forget(&k).await;
        assert_eq!(queue.failures(&k).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown().await;

        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("late")).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_enqueue() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after(key("a"), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.len().await, 1);
    }
}
