//! Level-triggered work queue.
//!
//! An item is queued at most once. An item added while it is being worked
//! on is marked dirty and re-queued when the worker calls [`WorkQueue::done`],
//! so the same item never runs on two workers at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::WorkItem;

#[derive(Debug, Default)]
struct QueueState {
    queued: HashSet<WorkItem>,
    in_flight: HashSet<WorkItem>,
    dirty: HashSet<WorkItem>,
}

/// Shared queue of pending work.
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    state: Mutex<QueueState>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Queue `item` unless it is already queued.
    pub fn add(&self, item: WorkItem) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.in_flight.contains(&item) {
            state.dirty.insert(item);
            return;
        }
        if state.queued.insert(item.clone()) {
            let _ = self.tx.send(item);
        }
    }

    /// Queue `item` after `delay` without blocking the caller.
    pub fn add_after(self: &Arc<Self>, item: WorkItem, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Wait for the next item and mark it in flight.
    pub async fn next(&self) -> Option<WorkItem> {
        let item = self.rx.lock().await.recv().await?;
        if let Ok(mut state) = self.state.lock() {
            state.queued.remove(&item);
            state.in_flight.insert(item.clone());
        }
        Some(item)
    }

    /// Mark `item` finished, re-queueing it if it was added meanwhile.
    pub fn done(&self, item: &WorkItem) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.in_flight.remove(item);
        if state.dirty.remove(item) && state.queued.insert(item.clone()) {
            let _ = self.tx.send(item.clone());
        }
    }

    /// Number of items queued or in flight.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.queued.len() + s.in_flight.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridop_api::{ResourceKey, ResourceKind};

    fn item(name: &str) -> WorkItem {
        WorkItem::Reconcile(ResourceKey::new(ResourceKind::Role, "ns", name))
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        queue.add(item("a"));
        queue.add(item("b"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, Some(item("a")));
        assert_eq!(queue.next().await, Some(item("b")));
    }

    #[tokio::test]
    async fn add_while_in_flight_reruns_after_done() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        let running = queue.next().await.unwrap();

        queue.add(item("a"));
        // Still in flight, so nothing new is queued yet.
        assert_eq!(queue.len(), 1);

        queue.done(&running);
        assert_eq!(queue.next().await, Some(item("a")));
        queue.done(&item("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_waits() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after(item("a"), Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.len(), 1);
    }
}
