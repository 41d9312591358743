//! Change notifications.
//!
//! Every committed write queues a batch of [`Change`] events. Batches are
//! enqueued while the writer connection is still held — so queue order is
//! commit order — and delivered afterwards by whichever thread drains the
//! hub first. A transaction that rolls back enqueues nothing.
//!
//! Observers register explicitly and hold a [`SubscriptionId`] until they
//! unsubscribe; there is no weak-reference auto-removal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// One committed mutation, carrying the record's post-commit state (for
/// deletes, its last state).
pub enum Change<M> {
    /// A row was inserted.
    Inserted(Arc<M>),
    /// A row was updated (or replaced by upsert).
    Updated(Arc<M>),
    /// A row was deleted.
    Deleted(Arc<M>),
}

impl<M> Change<M> {
    /// The record the change concerns.
    #[must_use]
    pub fn record(&self) -> &Arc<M> {
        match self {
            Self::Inserted(r) | Self::Updated(r) | Self::Deleted(r) => r,
        }
    }
}

impl<M> Clone for Change<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Inserted(r) => Self::Inserted(r.clone()),
            Self::Updated(r) => Self::Updated(r.clone()),
            Self::Deleted(r) => Self::Deleted(r.clone()),
        }
    }
}

/// Sink for committed changes on one record store.
///
/// Callbacks fire strictly after the owning transaction commits, bracketed
/// by `on_will_change`/`on_did_change` per batch, in commit order.
pub trait ChangeObserver<M>: Send + Sync {
    /// A batch of changes is about to be delivered.
    fn on_will_change(&self) {}
    /// A row was inserted.
    fn on_inserted(&self, record: &Arc<M>) {
        let _ = record;
    }
    /// A row was updated.
    fn on_updated(&self, record: &Arc<M>) {
        let _ = record;
    }
    /// A row was deleted.
    fn on_deleted(&self, record: &Arc<M>) {
        let _ = record;
    }
    /// The batch finished delivering.
    fn on_did_change(&self) {}
}

/// Handle identifying one registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Post-commit notification fan-out for one record store.
pub struct NotificationHub<M> {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ChangeObserver<M>>)>>,
    next_id: AtomicU64,
    queue: Mutex<VecDeque<Vec<Change<M>>>>,
    // Held by whichever thread is currently delivering; keeps delivery FIFO
    // across concurrent committers.
    delivering: Mutex<()>,
}

impl<M> Default for NotificationHub<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> NotificationHub<M> {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue: Mutex::new(VecDeque::new()),
            delivering: Mutex::new(()),
        }
    }

    /// Register an observer; the returned id removes it again.
    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver<M>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Pending deliveries to it are cancelled (batches
    /// drained after this call skip it).
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.write().retain(|(sid, _)| *sid != id);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Queue a committed batch. Call while still holding the writer so the
    /// queue preserves commit order. Empty batches are dropped.
    pub fn publish(&self, batch: Vec<Change<M>>) {
        if batch.is_empty() {
            return;
        }
        self.queue.lock().push_back(batch);
    }

    /// Deliver queued batches to every observer, FIFO.
    ///
    /// Called after the writer is released. If another thread is already
    /// delivering, this one waits its turn; the queue keeps global order
    /// either way.
    pub fn pump(&self) {
        let _guard = self.delivering.lock();
        loop {
            let Some(batch) = self.queue.lock().pop_front() else {
                break;
            };
            let observers: Vec<Arc<dyn ChangeObserver<M>>> = self
                .observers
                .read()
                .iter()
                .map(|(_, o)| o.clone())
                .collect();
            debug!(
                changes = batch.len(),
                observers = observers.len(),
                "delivering change batch"
            );
            for observer in &observers {
                observer.on_will_change();
                for change in &batch {
                    match change {
                        Change::Inserted(r) => observer.on_inserted(r),
                        Change::Updated(r) => observer.on_updated(r),
                        Change::Deleted(r) => observer.on_deleted(r),
                    }
                }
                observer.on_did_change();
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
