//! Delayed-delivery scheduler (§4.6): a min-heap keyed by due time. A single
//! dispatcher task sleeps until the heap's minimum, then hands the item to
//! whatever sink the caller wired up (normally the queue's `enqueue`).
//!
//! Cancellation is O(log n): each entry's heap index is tracked in a side
//! table so `cancel` doesn't need a linear scan, matching the "index
//! back-pointer" the spec calls for instead of lazy-tombstone deletion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

pub type ScheduleId = u64;

struct Entry<T> {
    id: ScheduleId,
    due_at: DateTime<Utc>,
    item: T,
}

/// A binary min-heap over `Entry<T>` ordered by `due_at`, with an index
/// table mapping `id -> position` so arbitrary entries can be removed in
/// `O(log n)` instead of `O(n)`.
struct IndexedHeap<T> {
    heap: Vec<Entry<T>>,
    positions: HashMap<ScheduleId, usize>,
}

impl<T> IndexedHeap<T> {
    fn new() -> Self {
        Self {
            heap: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn peek_due_at(&self) -> Option<DateTime<Utc>> {
        self.heap.first().map(|e| e.due_at)
    }

    fn push(&mut self, id: ScheduleId, due_at: DateTime<Utc>, item: T) {
        let idx = self.heap.len();
        self.heap.push(Entry { id, due_at, item });
        self.positions.insert(id, idx);
        self.sift_up(idx);
    }

    fn pop_min(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let entry = self.heap.pop().expect("heap non-empty");
        self.positions.remove(&entry.id);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(entry.item)
    }

    fn remove(&mut self, id: ScheduleId) -> Option<T> {
        let idx = *self.positions.get(&id)?;
        let last = self.heap.len() - 1;
        self.swap(idx, last);
        let entry = self.heap.pop().expect("heap non-empty");
        self.positions.remove(&entry.id);
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some(entry.item)
    }

    fn drain_all(&mut self) -> Vec<(T, DateTime<Utc>)> {
        self.positions.clear();
        self.heap.drain(..).map(|e| (e.item, e.due_at)).collect()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].id, a);
        self.positions.insert(self.heap[b].id, b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].due_at < self.heap[parent].due_at {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.heap[left].due_at < self.heap[smallest].due_at {
                smallest = left;
            }
            if right < len && self.heap[right].due_at < self.heap[smallest].due_at {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }
}

/// Holds delayed items until their due time, then yields them in due-time
/// order via `run`. Generic over the scheduled payload so the queue crate
/// can schedule whatever its `enqueue` needs (message + metadata).
pub struct Scheduler<T> {
    inner: Mutex<IndexedHeap<T>>,
    notify: Notify,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl<T> Scheduler<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(IndexedHeap::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hold `item` until `due_at`. Returns an id usable with `cancel`.
    pub fn schedule(&self, item: T, due_at: DateTime<Utc>) -> ScheduleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let should_wake = {
            let mut inner = self.inner.lock();
            let wake = inner.peek_due_at().map_or(true, |min| due_at < min);
            inner.push(id, due_at, item);
            wake
        };
        if should_wake {
            self.notify.notify_one();
        }
        id
    }

    /// Remove a previously scheduled item before it becomes due. `O(log n)`.
    pub fn cancel(&self, id: ScheduleId) -> Option<T> {
        self.inner.lock().remove(id)
    }

    /// Drain everything still pending, in no particular order, pairing each
    /// item with the due time it was waiting for. Used on shutdown so the
    /// caller can decide whether to re-enqueue immediately or discard (§4.6,
    /// §12 open-question (a): scheduled messages don't survive a process
    /// restart, but the caller gets a chance to persist this snapshot).
    pub fn drain(&self) -> Vec<(T, DateTime<Utc>)> {
        self.inner.lock().drain_all()
    }

    /// Runs until `shutdown` is called, sleeping until the next due item and
    /// forwarding each one to `on_due` as it becomes ready. Intended to be
    /// spawned as a single background task per scheduler instance.
    pub async fn run(self: &Arc<Self>, mut on_due: impl FnMut(T)) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            let next_due = { self.inner.lock().peek_due_at() };

            match next_due {
                None => {
                    self.notify.notified().await;
                }
                Some(due_at) => {
                    let now = Utc::now();
                    if due_at <= now {
                        if let Some(item) = self.inner.lock().pop_min() {
                            on_due(item);
                        }
                        continue;
                    }
                    let wait = (due_at - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::from_millis(0));
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Signal `run` to stop after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn pops_in_due_time_order() {
        let sched: Arc<Scheduler<&str>> = Scheduler::new();
        let now = Utc::now();
        sched.schedule("third", now + ChronoDuration::seconds(30));
        sched.schedule("first", now + ChronoDuration::seconds(10));
        sched.schedule("second", now + ChronoDuration::seconds(20));

        let mut inner = sched.inner.lock();
        assert_eq!(inner.pop_min(), Some("first"));
        assert_eq!(inner.pop_min(), Some("second"));
        assert_eq!(inner.pop_min(), Some("third"));
    }

    #[test]
    fn cancel_removes_pending_entry() {
        let sched: Arc<Scheduler<&str>> = Scheduler::new();
        let now = Utc::now();
        let keep = sched.schedule("keep", now + ChronoDuration::seconds(5));
        let drop_id = sched.schedule("drop", now + ChronoDuration::seconds(1));

        assert_eq!(sched.cancel(drop_id), Some("drop"));
        assert_eq!(sched.len(), 1);

        let mut inner = sched.inner.lock();
        assert_eq!(inner.pop_min(), Some("keep"));
        drop(inner);
        assert!(sched.cancel(keep).is_none());
    }

    #[tokio::test]
    async fn run_dispatches_once_due() {
        let sched: Arc<Scheduler<&str>> = Scheduler::new();
        sched.schedule("now", Utc::now() - ChronoDuration::milliseconds(1));

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let dispatched_clone = dispatched.clone();
        let sched_clone = sched.clone();
        let handle = tokio::spawn(async move {
            sched_clone
                .run(|item| dispatched_clone.lock().push(item))
                .await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sched.shutdown();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;

        assert_eq!(*dispatched.lock(), vec!["now"]);
    }

    #[tokio::test]
    async fn drain_returns_pending_entries_on_shutdown() {
        let sched: Arc<Scheduler<&str>> = Scheduler::new();
        let now = Utc::now();
        sched.schedule("a", now + ChronoDuration::seconds(60));
        sched.schedule("b", now + ChronoDuration::seconds(120));

        let drained = sched.drain();
        assert_eq!(drained.len(), 2);
        assert!(sched.is_empty());
    }
}
