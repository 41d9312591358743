//! Live queries: ordered result windows kept current by incremental diffs.
//!
//! A [`LiveResults`] controller executes a [`FetchRequest`] once, then
//! listens to its record store's change notifications. For each committed
//! change it re-evaluates only the affected row's membership and position —
//! predicate match plus a binary search over the snapshot's sort keys — and
//! emits exactly one [`ResultChange`] (insert, delete, move, or update) to
//! its observer. Update cost tracks the change, not the result size.
//!
//! Windowed requests (offset/limit) cannot decide membership from one row's
//! values, so they refresh by re-running the compiled query and diffing the
//! two snapshots.
//!
//! A failure while computing one controller's diff is reported to that
//! controller's observer only; other controllers and the store are
//! unaffected.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use missive_core::{ColumnValues, FieldValue, Predicate, RecordId, SortKey, compare_key_values};

use crate::cache::RecordCache;
use crate::dao::{OrderedRow, RecordStore};
use crate::errors::{Result, StoreError};
use crate::notify::{ChangeObserver, SubscriptionId};
use crate::record::Model;

/// A live query request: filter, order, window.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Row filter.
    pub predicate: Predicate,
    /// Sort criteria; the identifier is always the final tie-breaker.
    pub sort: Vec<SortKey>,
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Maximum rows in the window.
    pub limit: Option<u64>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            predicate: Predicate::True,
            sort: Vec::new(),
            offset: None,
            limit: None,
        }
    }
}

impl FetchRequest {
    /// Request matching `predicate` with no ordering or window.
    #[must_use]
    pub fn matching(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    /// Add sort criteria.
    #[must_use]
    pub fn sorted_by(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    fn windowed(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }
}

/// One structured diff against the current snapshot.
#[derive(Debug)]
pub enum ResultChange<M> {
    /// A row entered the results at `index`.
    Insert {
        /// Position of the new row.
        index: usize,
        /// The row.
        record: Arc<M>,
    },
    /// The row at `index` left the results.
    Delete {
        /// Position the row held.
        index: usize,
        /// The row's last state.
        record: Arc<M>,
    },
    /// A row moved from `from` to `to` (positions after removal).
    Move {
        /// Old position.
        from: usize,
        /// New position.
        to: usize,
        /// The row.
        record: Arc<M>,
    },
    /// The row at `index` changed in place.
    Update {
        /// Position of the row.
        index: usize,
        /// The row's new state.
        record: Arc<M>,
    },
}

/// Observer of one live query's diffs.
///
/// Diffs arrive bracketed by `on_will_change`/`on_did_change`, in
/// notification order. Callbacks must not issue store writes synchronously.
pub trait LiveObserver<M>: Send + Sync {
    /// A diff is about to be delivered.
    fn on_will_change(&self) {}
    /// One structured change against the snapshot.
    fn on_change(&self, change: &ResultChange<M>) {
        let _ = change;
    }
    /// The diff finished delivering.
    fn on_did_change(&self) {}
    /// Computing a diff for this controller failed; the snapshot may lag
    /// until the next refresh.
    fn on_error(&self, error: &StoreError) {
        let _ = error;
    }
}

enum State {
    Idle,
    Materialized(Vec<OrderedRow>),
    Closed,
}

struct LiveInner<M: Model> {
    store: Arc<RecordStore<M>>,
    request: FetchRequest,
    ascending: Vec<bool>,
    observer: RwLock<Option<Arc<dyn LiveObserver<M>>>>,
    state: Mutex<State>,
    rows: RecordCache<M>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Controller for one auto-updating result set.
pub struct LiveResults<M: Model> {
    inner: Arc<LiveInner<M>>,
}

impl<M: Model> Clone for LiveResults<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Model> LiveResults<M> {
    /// New controller over `store` for `request`. Call
    /// [`execute`](Self::execute) to materialize.
    #[must_use]
    pub fn new(store: Arc<RecordStore<M>>, request: FetchRequest, row_cache_capacity: usize) -> Self {
        let ascending = request.sort.iter().map(|k| k.ascending).collect();
        Self {
            inner: Arc::new(LiveInner {
                store,
                request,
                ascending,
                observer: RwLock::new(None),
                state: Mutex::new(State::Idle),
                rows: RecordCache::new(row_cache_capacity),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Install the diff observer (replacing any previous one).
    pub fn set_observer(&self, observer: Arc<dyn LiveObserver<M>>) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Run the query, materialize the snapshot, and start tracking changes.
    ///
    /// Returns the result count. Re-executing re-materializes without
    /// emitting diffs.
    pub fn execute(&self) -> Result<usize> {
        let entries = {
            let state = self.inner.state.lock();
            if matches!(*state, State::Closed) {
                return Err(StoreError::ControllerClosed);
            }
            drop(state);
            self.inner.store.fetch_entries(
                &self.inner.request.predicate,
                &self.inner.request.sort,
                self.inner.request.offset,
                self.inner.request.limit,
            )?
        };
        let count = entries.len();
        {
            let mut state = self.inner.state.lock();
            if matches!(*state, State::Closed) {
                return Err(StoreError::ControllerClosed);
            }
            *state = State::Materialized(entries);
        }
        let mut subscription = self.inner.subscription.lock();
        if subscription.is_none() {
            let observer: Arc<dyn ChangeObserver<M>> = self.inner.clone();
            *subscription = Some(self.inner.store.subscribe(observer));
        }
        debug!(count, "live query materialized");
        Ok(count)
    }

    /// Number of rows in the current snapshot (0 before `execute`).
    pub fn len(&self) -> Result<usize> {
        match &*self.inner.state.lock() {
            State::Closed => Err(StoreError::ControllerClosed),
            State::Idle => Ok(0),
            State::Materialized(snapshot) => Ok(snapshot.len()),
        }
    }

    /// True when the snapshot holds no rows.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The snapshot's ordered logical ids.
    pub fn ids(&self) -> Result<Vec<RecordId>> {
        match &*self.inner.state.lock() {
            State::Closed => Err(StoreError::ControllerClosed),
            State::Idle => Ok(Vec::new()),
            State::Materialized(snapshot) => {
                Ok(snapshot.iter().map(|e| e.id.clone()).collect())
            }
        }
    }

    /// Dereference the row at `index`, through the controller's bounded row
    /// cache.
    pub fn object_at(&self, index: usize) -> Result<Arc<M>> {
        let id = match &*self.inner.state.lock() {
            State::Closed => return Err(StoreError::ControllerClosed),
            State::Idle => {
                return Err(StoreError::NotFound("live query not executed".into()));
            }
            State::Materialized(snapshot) => snapshot
                .get(index)
                .ok_or_else(|| StoreError::NotFound(format!("live result index {index}")))?
                .id
                .clone(),
        };
        if let Some(hit) = self.inner.rows.get(&id) {
            return Ok(hit);
        }
        let record = self
            .inner
            .store
            .fetch_by_id(&id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(self.inner.rows.get_or_insert(id, record))
    }

    /// Stop tracking changes. Pending deliveries to this controller are
    /// cancelled; later calls fail with [`StoreError::ControllerClosed`].
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            *state = State::Closed;
        }
        if let Some(id) = self.inner.subscription.lock().take() {
            self.inner.store.unsubscribe(id);
        }
        self.inner.rows.clear();
        debug!("live query closed");
    }
}

#[derive(Clone, Copy)]
enum Mutation {
    Inserted,
    Updated,
    Deleted,
}

impl<M: Model> LiveInner<M> {
    fn emit(&self, changes: Vec<ResultChange<M>>) {
        if changes.is_empty() {
            return;
        }
        let observer = self.observer.read().clone();
        let Some(observer) = observer else { return };
        observer.on_will_change();
        for change in &changes {
            observer.on_change(change);
        }
        observer.on_did_change();
    }

    fn report(&self, error: &StoreError) {
        if let Some(observer) = self.observer.read().clone() {
            observer.on_error(error);
        }
    }

    /// Sort-key tuple for a record's encoded values (sort fields, then id).
    fn key_of(&self, record: &M, values: &ColumnValues) -> Vec<FieldValue> {
        let mut key: Vec<FieldValue> = self
            .request
            .sort
            .iter()
            .map(|k| values.get(&k.field).cloned().unwrap_or(FieldValue::Null))
            .collect();
        let id_value = self
            .store
            .table_named(record.table_name())
            .and_then(|t| values.get(&t.id_column).cloned())
            .unwrap_or_else(|| FieldValue::Text(record.id().as_str().to_owned()));
        key.push(id_value);
        key
    }

    fn insertion_point(&self, snapshot: &[OrderedRow], key: &[FieldValue]) -> usize {
        snapshot.partition_point(|e| {
            compare_key_values(&e.key, key, &self.ascending) == Ordering::Less
        })
    }

    fn handle(&self, mutation: Mutation, record: &Arc<M>) {
        match self.apply(mutation, record) {
            Ok(changes) => self.emit(changes),
            Err(error) => self.report(&error),
        }
    }

    /// Apply one committed mutation to the snapshot; returns the diffs to
    /// emit after the lock is released.
    fn apply(&self, mutation: Mutation, record: &Arc<M>) -> Result<Vec<ResultChange<M>>> {
        let mut state = self.state.lock();
        let State::Materialized(snapshot) = &mut *state else {
            return Ok(Vec::new());
        };

        if self.request.windowed() {
            return self.refresh_snapshot(snapshot, Some(record));
        }

        let id = record.id();
        let old_pos = snapshot.iter().position(|e| &e.id == id);
        match mutation {
            Mutation::Deleted => {
                self.rows.remove(id);
                if let Some(index) = old_pos {
                    let _ = snapshot.remove(index);
                    return Ok(vec![ResultChange::Delete {
                        index,
                        record: record.clone(),
                    }]);
                }
                Ok(Vec::new())
            }
            Mutation::Inserted | Mutation::Updated => {
                let values = record.encode()?;
                let matches = self.request.predicate.matches(&values);
                let key = self.key_of(record, &values);
                match (old_pos, matches) {
                    (Some(index), false) => {
                        // Fell out of the predicate: degrade to delete.
                        let _ = snapshot.remove(index);
                        self.rows.remove(id);
                        Ok(vec![ResultChange::Delete {
                            index,
                            record: record.clone(),
                        }])
                    }
                    (Some(from), true) => {
                        let entry = snapshot.remove(from);
                        let to = self.insertion_point(snapshot, &key);
                        snapshot.insert(
                            to,
                            OrderedRow {
                                id: entry.id,
                                key,
                            },
                        );
                        self.rows.insert(id.clone(), record.clone());
                        if from == to {
                            Ok(vec![ResultChange::Update {
                                index: from,
                                record: record.clone(),
                            }])
                        } else {
                            Ok(vec![ResultChange::Move {
                                from,
                                to,
                                record: record.clone(),
                            }])
                        }
                    }
                    (None, true) => {
                        // Newly matching: degrade to insert at sorted position.
                        let index = self.insertion_point(snapshot, &key);
                        snapshot.insert(
                            index,
                            OrderedRow {
                                id: id.clone(),
                                key,
                            },
                        );
                        self.rows.insert(id.clone(), record.clone());
                        Ok(vec![ResultChange::Insert {
                            index,
                            record: record.clone(),
                        }])
                    }
                    (None, false) => Ok(Vec::new()),
                }
            }
        }
    }

    /// Windowed path: re-run the query and diff the snapshots. Deletes emit
    /// in descending old order, inserts in ascending new order, and the
    /// triggering row (when it stays in the window) emits a move or update.
    fn refresh_snapshot(
        &self,
        snapshot: &mut Vec<OrderedRow>,
        trigger: Option<&Arc<M>>,
    ) -> Result<Vec<ResultChange<M>>> {
        let fresh = self.store.fetch_entries(
            &self.request.predicate,
            &self.request.sort,
            self.request.offset,
            self.request.limit,
        )?;

        let in_fresh =
            |id: &RecordId| fresh.iter().position(|e| &e.id == id);
        let in_old = |id: &RecordId| snapshot.iter().position(|e| &e.id == id);

        let mut changes = Vec::new();
        for (index, entry) in snapshot.iter().enumerate().rev() {
            if in_fresh(&entry.id).is_none() {
                if let Some(record) = self.record_for(&entry.id, trigger) {
                    changes.push(ResultChange::Delete {
                        index,
                        record,
                    });
                }
                self.rows.remove(&entry.id);
            }
        }
        for (index, entry) in fresh.iter().enumerate() {
            if in_old(&entry.id).is_none() {
                if let Some(record) = self.record_for(&entry.id, trigger) {
                    changes.push(ResultChange::Insert {
                        index,
                        record,
                    });
                }
            }
        }
        if let Some(record) = trigger {
            let id = record.id();
            if let (Some(from), Some(to)) = (in_old(id), in_fresh(id)) {
                self.rows.insert(id.clone(), record.clone());
                if from == to {
                    changes.push(ResultChange::Update {
                        index: to,
                        record: record.clone(),
                    });
                } else {
                    changes.push(ResultChange::Move {
                        from,
                        to,
                        record: record.clone(),
                    });
                }
            }
        }

        *snapshot = fresh;
        Ok(changes)
    }

    fn record_for(&self, id: &RecordId, trigger: Option<&Arc<M>>) -> Option<Arc<M>> {
        if let Some(record) = trigger {
            if record.id() == id {
                return Some(record.clone());
            }
        }
        if let Some(hit) = self.rows.get(id) {
            return Some(hit);
        }
        self.store.fetch_by_id(id).ok().flatten()
    }
}

impl<M: Model> ChangeObserver<M> for LiveInner<M> {
    fn on_inserted(&self, record: &Arc<M>) {
        self.handle(Mutation::Inserted, record);
    }

    fn on_updated(&self, record: &Arc<M>) {
        self.handle(Mutation::Updated, record);
    }

    fn on_deleted(&self, record: &Arc<M>) {
        self.handle(Mutation::Deleted, record);
    }
}
