//! Shared FIFO of file work items
//!
//! Producers push; any number of workers wait on `pop`. An outstanding counter
//! covers both queued items and items a worker has popped but not yet
//! reported done, so `wait_idle` only returns once all work has settled.

use crate::models::WorkItem;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    available: Notify,
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn push(&self, item: WorkItem) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    pub fn push_all(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut count = 0;
        for item in items {
            self.push(item);
            count += 1;
        }
        count
    }

    /// Wait for the next item
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> WorkItem {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }

            notified.await;
        }
    }

    /// Report that a popped item has been fully handled
    pub fn task_done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }

    /// Wait until every pushed item has been reported done
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Remove every queued item without handing it to a worker
    ///
    /// Drained items count as done.
    pub fn drain(&self) -> Vec<WorkItem> {
        let drained: Vec<WorkItem> = self.items.lock().drain(..).collect();
        for _ in &drained {
            self.task_done();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Queued plus in-flight items
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}
