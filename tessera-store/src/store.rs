use crate::{
    check, data::same, mark, read, read_plural, recycle_nodes_into, Availability, LayerFn,
    OperationDescriptor, OptimisticLayers, PluralReaderSelector, RecordSource, RecordSourceMap,
    RequestDescriptor, SingularReaderSelector, Snapshot, StoreError, StoreOptions
};
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeMap, VecDeque},
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak
    }
};
use tessera::{DataId, OperationLoader};

/// Called with the new snapshot whenever a notification pass changed the data of a
/// subscription.
pub type SubscriptionCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

type PublishFn = Box<dyn FnOnce(&dyn RecordSource) -> RecordSourceMap + Send>;

/// A handle to undo a subscription, retain or hold. Disposing twice does nothing.
///
/// Dropping the handle does not dispose it.
pub struct Disposable {
    dispose: Mutex<Option<Box<dyn FnOnce() + Send>>>
}

impl Disposable {
    pub fn new<F: FnOnce() + Send + 'static>(dispose: F) -> Self {
        Disposable {
            dispose: Mutex::new(Some(Box::new(dispose)))
        }
    }

    /// A handle with nothing to dispose.
    pub fn empty() -> Self {
        Disposable {
            dispose: Mutex::new(None)
        }
    }

    pub fn dispose(&self) {
        let dispose = self.dispose.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.dispose.lock().is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An applied optimistic update, to be passed to
/// [`revert_update`](./struct.Store.html#method.revert_update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimisticUpdate {
    key: u64
}

impl OptimisticUpdate {
    pub fn key(&self) -> u64 {
        self.key
    }
}

/// Whether an operation can be fulfilled from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAvailability {
    /// Everything is there. `fetch_epoch` is the notification epoch the operation was last
    /// written in, if it is retained.
    Available { fetch_epoch: Option<u64> },
    /// The store was invalidated after the operation was last written.
    Stale,
    Missing
}

struct Subscription {
    snapshot: Snapshot,
    callback: SubscriptionCallback,
    active: Arc<AtomicBool>
}

struct RootEntry {
    operation: OperationDescriptor,
    ref_count: usize,
    epoch: Option<u64>
}

enum PendingMutation {
    Publish(RecordSourceMap),
    PublishWith(PublishFn),
    ApplyUpdate(u64, LayerFn),
    RevertUpdate(u64),
    RunGc
}

struct StoreInner {
    base: RecordSourceMap,
    layers: OptimisticLayers,
    updated_ids: FnvHashSet<DataId>,
    // Keyed by registration order.
    subscriptions: BTreeMap<u64, Subscription>,
    next_subscription_key: u64,
    roots: FnvHashMap<String, RootEntry>,
    release_buffer: VecDeque<String>,
    gc_hold_count: usize,
    gc_pending: bool,
    gc_scheduled: bool,
    notifying: bool,
    pending: VecDeque<PendingMutation>,
    pending_source_operations: Vec<String>,
    next_update_key: u64,
    current_epoch: u64,
    invalidation_epoch: Option<u64>,
    options: StoreOptions,
    operation_loader: Option<Arc<dyn OperationLoader>>
}

/// The normalized store.
///
/// Holds the base records and the optimistic layers above them, the live subscriptions and
/// the retained operations. The store is a cheap handle; clones share the same state.
///
/// Writes (`publish`, `apply_update`, `revert_update`, garbage collection) only record the
/// ids they changed. [`notify`](#method.notify) then re-reads every subscription that saw
/// one of those ids and calls the ones whose data changed, in the order they subscribed.
/// Callbacks run without any lock held, so they may use the store; writes they make are
/// queued and handled by the running pass before it returns.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>
}

impl Default for Store {
    fn default() -> Self {
        Store::new(RecordSourceMap::new(), StoreOptions::default())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("records", &inner.base.size())
            .field("layers", &inner.layers)
            .field("subscriptions", &inner.subscriptions.len())
            .field("roots", &inner.roots.len())
            .finish()
    }
}

impl StoreInner {
    fn apply(&mut self, mutation: PendingMutation) {
        match mutation {
            PendingMutation::Publish(source) => self.publish_source(&source),
            PendingMutation::PublishWith(publish) => {
                let sink = publish(&self.base);
                self.publish_source(&sink);
            }
            PendingMutation::ApplyUpdate(key, update) => {
                let changed = self.layers.push(&self.base, key, update);
                self.updated_ids.extend(changed);
            }
            PendingMutation::RevertUpdate(key) => {
                if let Some(changed) = self.layers.remove(&self.base, key) {
                    self.updated_ids.extend(changed);
                }
            }
            PendingMutation::RunGc => self.collect_garbage()
        }
    }

    fn publish_source(&mut self, source: &RecordSourceMap) {
        let updated = self.base.publish(source);
        tracing::debug!(records = updated.len(), "published records");
        self.updated_ids.extend(updated);
        if !self.layers.is_empty() {
            let changed = self.layers.rebase(&self.base);
            self.updated_ids.extend(changed);
        }
    }

    fn collect_garbage(&mut self) {
        self.gc_scheduled = false;
        if !self.layers.is_empty() || self.gc_hold_count > 0 {
            self.gc_pending = true;
            return;
        }
        self.gc_pending = false;

        let mut references = FnvHashSet::default();
        let loader = self.operation_loader.as_deref();
        for root in self.roots.values() {
            mark(&self.base, &root.operation.root, &mut references, loader);
        }
        let mut collected = 0;
        for id in self.base.record_ids() {
            if !references.contains(&id) {
                self.base.remove(&id);
                self.updated_ids.insert(id);
                collected += 1;
            }
        }
        tracing::debug!(collected, retained = references.len(), "garbage collected");
    }

    fn advance_epoch(&mut self) {
        self.current_epoch += 1;
        let epoch = self.current_epoch;
        for identifier in mem::take(&mut self.pending_source_operations) {
            if let Some(root) = self.roots.get_mut(&identifier) {
                root.epoch = Some(epoch);
            }
        }
    }

    /// Re-read every subscription that saw an updated id. Returns the callbacks to run.
    fn collect_updates(
        &mut self,
        owners: &mut Vec<Arc<RequestDescriptor>>
    ) -> Vec<(SubscriptionCallback, Arc<AtomicBool>, Snapshot)> {
        let updated = mem::take(&mut self.updated_ids);
        if updated.is_empty() {
            return Vec::new();
        }
        let StoreInner {
            base,
            layers,
            subscriptions,
            ..
        } = self;
        let view = layers.view(base);

        let mut dispatches = Vec::new();
        for (key, subscription) in subscriptions.iter_mut() {
            let seen = &subscription.snapshot.seen_records;
            if !updated.iter().any(|id| seen.contains(id)) {
                continue;
            }

            let next = read(&view, &subscription.snapshot.selector);
            let data = recycle_nodes_into(&subscription.snapshot.data, next.data);
            let changed = !same(&subscription.snapshot.data, &data)
                || subscription.snapshot.is_missing_data != next.is_missing_data;
            subscription.snapshot = Snapshot { data, ..next };
            tracing::trace!(
                subscription = *key,
                changed,
                "re-read subscription"
            );
            if changed {
                let owner = &subscription.snapshot.selector.owner;
                if !owners.iter().any(|o| o.identifier == owner.identifier) {
                    owners.push(owner.clone());
                }
                dispatches.push((
                    subscription.callback.clone(),
                    subscription.active.clone(),
                    subscription.snapshot.clone()
                ));
            }
        }
        tracing::debug!(
            updated = updated.len(),
            notified = dispatches.len(),
            "notification pass"
        );
        dispatches
    }
}

/// Resets the notifying flag if a callback panics mid-pass.
struct NotifyGuard<'a> {
    inner: &'a Mutex<StoreInner>,
    armed: bool
}

impl<'a> Drop for NotifyGuard<'a> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().notifying = false;
        }
    }
}

impl Store {
    pub fn new(source: RecordSourceMap, options: StoreOptions) -> Self {
        Store {
            inner: Arc::new(Mutex::new(StoreInner {
                base: source,
                layers: OptimisticLayers::new(),
                updated_ids: FnvHashSet::default(),
                subscriptions: BTreeMap::new(),
                next_subscription_key: 0,
                roots: FnvHashMap::default(),
                release_buffer: VecDeque::new(),
                gc_hold_count: 0,
                gc_pending: false,
                gc_scheduled: false,
                notifying: false,
                pending: VecDeque::new(),
                pending_source_operations: Vec::new(),
                next_update_key: 0,
                current_epoch: 0,
                invalidation_epoch: None,
                options,
                operation_loader: None
            }))
        }
    }

    /// Follow `@module` selections through `loader` when collecting garbage and checking
    /// availability.
    pub fn with_operation_loader(self, loader: Arc<dyn OperationLoader>) -> Self {
        self.inner.lock().operation_loader = Some(loader);
        self
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.lock().options.clone()
    }

    /// Read a selector against the base records and every optimistic layer.
    pub fn lookup(&self, selector: &SingularReaderSelector) -> Snapshot {
        let inner = self.inner.lock();
        let view = inner.layers.view(&inner.base);
        read(&view, selector)
    }

    pub fn lookup_plural(&self, selector: &PluralReaderSelector) -> Vec<Option<Snapshot>> {
        let inner = self.inner.lock();
        let view = inner.layers.view(&inner.base);
        read_plural(&view, selector)
    }

    /// Run `f` against the current records, optimistic layers included.
    pub fn with_source<T, F: FnOnce(&dyn RecordSource) -> T>(&self, f: F) -> T {
        let inner = self.inner.lock();
        let view = inner.layers.view(&inner.base);
        f(&view)
    }

    /// Call `callback` whenever a notification pass changes the data of `snapshot`.
    pub fn subscribe<F>(&self, snapshot: Snapshot, callback: F) -> Disposable
    where
        F: Fn(&Snapshot) + Send + Sync + 'static
    {
        let active = Arc::new(AtomicBool::new(true));
        let key = {
            let mut inner = self.inner.lock();
            let key = inner.next_subscription_key;
            inner.next_subscription_key += 1;
            inner.subscriptions.insert(
                key,
                Subscription {
                    snapshot,
                    callback: Arc::new(callback),
                    active: active.clone()
                }
            );
            key
        };
        let inner = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            active.store(false, Ordering::SeqCst);
            if let Some(inner) = inner.upgrade() {
                inner.lock().subscriptions.remove(&key);
            }
        })
    }

    fn mutate(&self, mutation: PendingMutation) -> bool {
        let mut inner = self.inner.lock();
        if inner.notifying {
            inner.pending.push_back(mutation);
            false
        } else {
            inner.apply(mutation);
            true
        }
    }

    /// Merge records into the base. The changes are seen by the next
    /// [`notify`](#method.notify).
    pub fn publish(&self, source: RecordSourceMap) {
        self.mutate(PendingMutation::Publish(source));
    }

    /// Like [`publish`](#method.publish), but the records are computed from the base records
    /// at the time they are merged. `f` must not call into the store.
    pub fn publish_with<F>(&self, f: F)
    where
        F: FnOnce(&dyn RecordSource) -> RecordSourceMap + Send + 'static
    {
        self.mutate(PendingMutation::PublishWith(Box::new(f)));
    }

    /// Run a notification pass. `source_operation` is the operation whose payload was just
    /// published, if any; it is marked as written in the new epoch.
    ///
    /// Returns the owners of every subscription that was notified. Called from inside a
    /// subscription callback, this only queues the source operation and returns nothing.
    pub fn notify(&self, source_operation: Option<&OperationDescriptor>) -> Vec<Arc<RequestDescriptor>> {
        {
            let mut inner = self.inner.lock();
            if let Some(operation) = source_operation {
                inner
                    .pending_source_operations
                    .push(operation.request.identifier.clone());
            }
            if inner.notifying {
                return Vec::new();
            }
            inner.notifying = true;
        }
        let mut guard = NotifyGuard {
            inner: &self.inner,
            armed: true
        };

        let mut owners = Vec::new();
        loop {
            let dispatches = {
                let mut inner = self.inner.lock();
                while let Some(mutation) = inner.pending.pop_front() {
                    inner.apply(mutation);
                }
                inner.advance_epoch();
                inner.collect_updates(&mut owners)
            };
            for (callback, active, snapshot) in dispatches {
                if active.load(Ordering::SeqCst) {
                    callback(&snapshot);
                }
            }

            let mut inner = self.inner.lock();
            if inner.pending.is_empty() && inner.updated_ids.is_empty() {
                inner.notifying = false;
                guard.armed = false;
                break;
            }
        }
        drop(guard);

        let collect = {
            let inner = self.inner.lock();
            inner.gc_pending && inner.options.gc_scheduler.is_none()
        };
        if collect {
            self.run_gc();
        }
        owners
    }

    /// Add an optimistic layer computed by `update` and notify.
    pub fn apply_update(&self, update: LayerFn) -> OptimisticUpdate {
        let key = {
            let mut inner = self.inner.lock();
            inner.next_update_key += 1;
            inner.next_update_key
        };
        if self.mutate(PendingMutation::ApplyUpdate(key, update)) {
            self.notify(None);
        }
        OptimisticUpdate { key }
    }

    /// Remove an optimistic layer and notify. Layers above it are recomputed.
    pub fn revert_update(&self, update: &OptimisticUpdate) {
        if self.remove_update(update) {
            self.notify(None);
        }
    }

    /// Remove an optimistic layer without notifying. Returns `false` if the removal was
    /// queued behind a running notification pass.
    pub(crate) fn remove_update(&self, update: &OptimisticUpdate) -> bool {
        let applied = self.mutate(PendingMutation::RevertUpdate(update.key));
        if applied {
            let collect = {
                let inner = self.inner.lock();
                inner.layers.is_empty() && inner.gc_pending
            };
            if collect {
                self.schedule_gc();
            }
        }
        applied
    }

    /// Keep the records of `operation` from being garbage collected until the returned
    /// handle is disposed.
    pub fn retain(&self, operation: &OperationDescriptor) -> Disposable {
        let identifier = operation.request.identifier.clone();
        {
            let mut inner = self.inner.lock();
            inner.release_buffer.retain(|id| id != &identifier);
            let root = inner
                .roots
                .entry(identifier.clone())
                .or_insert_with(|| RootEntry {
                    operation: operation.clone(),
                    ref_count: 0,
                    epoch: None
                });
            root.ref_count += 1;
        }

        let inner = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = inner.upgrade() {
                Store { inner }.release(&identifier);
            }
        })
    }

    fn release(&self, identifier: &str) {
        let should_collect = {
            let mut inner = self.inner.lock();
            let ref_count = match inner.roots.get_mut(identifier) {
                Some(root) => {
                    root.ref_count = root.ref_count.saturating_sub(1);
                    root.ref_count
                }
                None => return
            };
            if ref_count > 0 {
                return;
            }

            let buffer_size = inner.options.gc_release_buffer_size;
            if buffer_size == 0 {
                inner.roots.remove(identifier);
                true
            } else {
                inner.release_buffer.push_back(identifier.to_string());
                let mut evicted = false;
                while inner.release_buffer.len() > buffer_size {
                    if let Some(id) = inner.release_buffer.pop_front() {
                        let unused = inner
                            .roots
                            .get(&id)
                            .map(|root| root.ref_count == 0)
                            .unwrap_or(false);
                        if unused {
                            inner.roots.remove(&id);
                            evicted = true;
                        }
                    }
                }
                evicted
            }
        };
        if should_collect {
            self.schedule_gc();
        }
    }

    fn schedule_gc(&self) {
        let scheduler = {
            let mut inner = self.inner.lock();
            if inner.gc_hold_count > 0 {
                inner.gc_pending = true;
                return;
            }
            match inner.options.gc_scheduler.clone() {
                Some(scheduler) => {
                    if inner.gc_scheduled {
                        return;
                    }
                    inner.gc_scheduled = true;
                    scheduler
                }
                None => {
                    inner.gc_pending = true;
                    return;
                }
            }
        };
        let inner: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        scheduler(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                Store { inner }.run_gc();
            }
        }));
    }

    /// Delete every record not reachable from a retained operation, then notify.
    ///
    /// Collection is postponed while optimistic layers exist or while collection is held.
    pub fn run_gc(&self) {
        let collected = {
            let mut inner = self.inner.lock();
            if inner.notifying {
                inner.pending.push_back(PendingMutation::RunGc);
                return;
            }
            inner.collect_garbage();
            !inner.updated_ids.is_empty()
        };
        if collected {
            self.notify(None);
        }
    }

    /// Postpone garbage collection until the returned handle is disposed.
    pub fn hold_gc(&self) -> Disposable {
        self.inner.lock().gc_hold_count += 1;
        let inner = Arc::downgrade(&self.inner);
        Disposable::new(move || {
            if let Some(inner) = inner.upgrade() {
                let pending = {
                    let mut guard = inner.lock();
                    guard.gc_hold_count = guard.gc_hold_count.saturating_sub(1);
                    guard.gc_hold_count == 0 && guard.gc_pending
                };
                if pending {
                    Store { inner }.schedule_gc();
                }
            }
        })
    }

    /// Whether `operation` can be fulfilled from the store.
    pub fn check(&self, operation: &OperationDescriptor) -> OperationAvailability {
        let inner = self.inner.lock();
        let epoch = inner
            .roots
            .get(&operation.request.identifier)
            .and_then(|root| root.epoch);
        if let Some(invalidation_epoch) = inner.invalidation_epoch {
            if epoch.map(|epoch| epoch <= invalidation_epoch).unwrap_or(true) {
                return OperationAvailability::Stale;
            }
        }

        let view = inner.layers.view(&inner.base);
        match check(&view, &operation.root, inner.operation_loader.as_deref()) {
            Availability::Available => OperationAvailability::Available { fetch_epoch: epoch },
            Availability::Missing => OperationAvailability::Missing
        }
    }

    /// Mark everything currently in the store as stale. Operations written after this are
    /// available again.
    pub fn invalidate_store(&self) {
        let mut inner = self.inner.lock();
        inner.current_epoch += 1;
        inner.invalidation_epoch = Some(inner.current_epoch);
    }

    /// The current records, optimistic layers included, in the JSON record format.
    pub fn snapshot_source(&self) -> Value {
        let inner = self.inner.lock();
        inner.layers.view(&inner.base).to_source().to_json()
    }

    /// Publish records in the JSON record format, e.g. from
    /// [`snapshot_source`](#method.snapshot_source), and notify.
    pub fn hydrate(&self, data: &Value) -> Result<(), StoreError> {
        let source = RecordSourceMap::from_json(data)?;
        if self.mutate(PendingMutation::Publish(source)) {
            self.notify(None);
        }
        Ok(())
    }
}
