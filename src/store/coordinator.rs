//! Reactive Store Coordinator
//!
//! Composes one JSON state tree from every module's state contributions and
//! batches change notifications.
//!
//! A dispatch runs each active reducer against its slice and compares the
//! result with the previous value. A change in a broadcasting slice sets the
//! pending-broadcast flag; a change in an observable slice adds that
//! observable to the pending set. Nothing is notified synchronously.
//!
//! A flush then runs rounds until nothing is pending. Each round:
//! 1. takes the pending set and flag,
//! 2. clears every registered memo cache whose `should_clear` agrees,
//! 3. recomputes each pending observable's cached value and calls its subscribers,
//! 4. calls the broadcast subscribers once if a broadcast was pending.
//!
//! A flush requested while one is running (a subscriber dispatching with
//! [`FlushMode::Immediate`], say) only raises the `flush_again` flag; the
//! running flush performs another round before returning to idle.

use crate::core::sync::lock_or;
use crate::error::{RuntimeError, RuntimeResult};
use crate::store::action::Action;
use crate::store::memo::{MemoCache, MemoHost, MemoId, MemoOptions, Memoized};
use crate::store::reducer::{NotificationScope, Reducer, StateContribution};
use crate::store::scheduler::{FlushMode, FlushScheduler, ManualFlush};
use crate::types::SubscriptionId;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushPhase {
    Idle,
    Flushing,
}

#[derive(Default)]
struct Observable {
    cached: Option<Value>,
    subscribers: IndexMap<SubscriptionId, Listener>,
}

struct MemoRegistration {
    owner: Option<String>,
    cache: Arc<dyn MemoCache>,
}

struct StoreState {
    tree: Map<String, Value>,
    /// Every contribution collected so far, keyed by slice
    contributions: IndexMap<String, StateContribution>,
    /// Contributions the last build composed; only these see dispatches
    active: IndexMap<String, StateContribution>,
    built: bool,
    scoped_reducers: bool,

    pending_broadcast: bool,
    pending_observables: IndexSet<String>,
    broadcast_subscribers: IndexMap<SubscriptionId, Listener>,
    observables: IndexMap<String, Observable>,
    memos: IndexMap<MemoId, MemoRegistration>,

    phase: FlushPhase,
    flush_again: bool,
    flush_scheduled: bool,
}

impl StoreState {
    fn new(scoped_reducers: bool) -> Self {
        Self {
            tree: Map::new(),
            contributions: IndexMap::new(),
            active: IndexMap::new(),
            built: false,
            scoped_reducers,
            pending_broadcast: false,
            pending_observables: IndexSet::new(),
            broadcast_subscribers: IndexMap::new(),
            observables: IndexMap::new(),
            memos: IndexMap::new(),
            phase: FlushPhase::Idle,
            flush_again: false,
            flush_scheduled: false,
        }
    }

    fn has_pending(&self) -> bool {
        self.pending_broadcast || !self.pending_observables.is_empty()
    }

    fn mark_changed(&mut self, scope: &NotificationScope) {
        match scope {
            NotificationScope::Broadcasting => self.pending_broadcast = true,
            NotificationScope::Observable(name) => {
                self.pending_observables.insert(name.clone());
            }
        }
    }

    /// Value of an observable: its slices as one object
    fn select(&self, name: &str) -> Value {
        let selected: Map<String, Value> = self
            .active
            .values()
            .filter(|c| matches!(&c.scope, NotificationScope::Observable(n) if n == name))
            .filter_map(|c| {
                self.tree
                    .get(&c.slice)
                    .map(|value| (c.slice.clone(), value.clone()))
            })
            .collect();
        Value::Object(selected)
    }
}

/// Returns the store to idle when a flush fails or a subscriber unwinds
struct FlushGuard<'a> {
    store: &'a Store,
    finished: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = match self.store.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.phase = FlushPhase::Idle;
        state.flush_again = false;
    }
}

pub(crate) struct StoreInner {
    state: Mutex<StoreState>,
    scheduler: Mutex<Arc<dyn FlushScheduler>>,
}

impl MemoHost for StoreInner {
    fn unregister_memo(&self, id: MemoId) {
        if let Ok(mut state) = self.state.lock() {
            state.memos.shift_remove(&id);
        }
    }
}

/// Handle to the composed state store; clones share one store
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.lock() {
            Ok(state) => f
                .debug_struct("Store")
                .field("slices", &state.tree.keys().collect::<Vec<_>>())
                .field("built", &state.built)
                .field("phase", &state.phase)
                .finish(),
            Err(_) => f.debug_struct("Store").finish_non_exhaustive(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Store {
    pub fn new(scoped_reducers: bool) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::new(scoped_reducers)),
                scheduler: Mutex::new(Arc::new(ManualFlush)),
            }),
        }
    }

    fn lock(&self) -> RuntimeResult<MutexGuard<'_, StoreState>> {
        lock_or(&self.inner.state, RuntimeError::internal)
    }

    pub fn set_scheduler(&self, scheduler: Arc<dyn FlushScheduler>) -> RuntimeResult<()> {
        *lock_or(&self.inner.scheduler, RuntimeError::internal)? = scheduler;
        Ok(())
    }

    /// Collect a contribution; it takes part in dispatch from the next build
    pub fn contribute(&self, owner: &str, contribution: StateContribution) -> RuntimeResult<()> {
        let contribution = contribution.owned_by(owner);
        let mut state = self.lock()?;
        if let Some(existing) = state.contributions.get(&contribution.slice) {
            return Err(RuntimeError::DuplicateStateSlice {
                slice: contribution.slice.clone(),
                owner: existing.owner.clone(),
            });
        }
        log::trace!("'{}' contributed state slice '{}'", owner, contribution.slice);
        state
            .contributions
            .insert(contribution.slice.clone(), contribution);
        Ok(())
    }

    /// Drop every contribution of `owner`; returns the number removed
    pub fn remove_contributions(&self, owner: &str) -> RuntimeResult<usize> {
        let mut state = self.lock()?;
        let before = state.contributions.len();
        state.contributions.retain(|_, c| c.owner != owner);
        Ok(before - state.contributions.len())
    }

    /// Unregister every memoized function owned by `owner`
    pub fn unregister_memos_of(&self, owner: &str) -> RuntimeResult<usize> {
        let mut state = self.lock()?;
        let before = state.memos.len();
        state
            .memos
            .retain(|_, memo| memo.owner.as_deref() != Some(owner));
        Ok(before - state.memos.len())
    }

    /// Recompose the tree from the collected contributions
    ///
    /// Existing slices keep their state; new slices are initialised by their
    /// reducer; slices without a contribution are dropped. Any change to the
    /// tree's shape is reported like a state change.
    pub fn rebuild(&self) -> RuntimeResult<()> {
        let (fresh, retired): (Vec<(String, Reducer)>, IndexMap<String, NotificationScope>) = {
            let mut state = self.lock()?;
            let contributions = state.contributions.clone();
            let previous = std::mem::replace(&mut state.active, contributions);
            state.built = true;
            // scopes of slices leaving the tree, so their observers hear about it
            let retired = previous
                .into_values()
                .filter(|c| !state.active.contains_key(&c.slice))
                .map(|c| (c.slice, c.scope))
                .collect();
            let fresh = state
                .active
                .values()
                .filter(|c| !state.tree.contains_key(&c.slice))
                .map(|c| (c.slice.clone(), Arc::clone(&c.reducer)))
                .collect();
            (fresh, retired)
        };

        let init = Action::init();
        let initialised: Vec<(String, Value)> = fresh
            .into_iter()
            .map(|(slice, reducer)| {
                let value = reducer(None, &init);
                (slice, value)
            })
            .collect();

        let needs_flush = {
            let mut state = self.lock()?;
            let stale: Vec<String> = state
                .tree
                .keys()
                .filter(|slice| !state.active.contains_key(*slice))
                .cloned()
                .collect();
            let mut changed: Vec<NotificationScope> = Vec::new();
            for slice in &stale {
                state.tree.remove(slice);
                changed.push(
                    retired
                        .get(slice)
                        .cloned()
                        .unwrap_or(NotificationScope::Broadcasting),
                );
            }
            for (slice, value) in initialised {
                if let Some(c) = state.active.get(&slice) {
                    changed.push(c.scope.clone());
                    state.tree.insert(slice, value);
                }
            }
            for scope in &changed {
                state.mark_changed(scope);
            }
            log::debug!(
                "store rebuilt: {} slice(s), {} removed",
                state.tree.len(),
                stale.len()
            );
            !changed.is_empty()
        };

        if needs_flush {
            self.schedule_flush()?;
        }
        Ok(())
    }

    pub fn is_built(&self) -> RuntimeResult<bool> {
        Ok(self.lock()?.built)
    }

    /// The whole state tree
    pub fn state(&self) -> RuntimeResult<Value> {
        Ok(Value::Object(self.lock()?.tree.clone()))
    }

    pub fn slice(&self, name: &str) -> RuntimeResult<Option<Value>> {
        Ok(self.lock()?.tree.get(name).cloned())
    }

    pub fn slice_names(&self) -> RuntimeResult<Vec<String>> {
        Ok(self.lock()?.tree.keys().cloned().collect())
    }

    pub fn dispatch(&self, action: Action) -> RuntimeResult<()> {
        self.dispatch_with(action, FlushMode::Deferred)
    }

    pub fn dispatch_with(&self, action: Action, mode: FlushMode) -> RuntimeResult<()> {
        let work: Vec<(StateContribution, Option<Value>)> = {
            let state = self.lock()?;
            state
                .active
                .values()
                .filter(|c| action.reaches(&c.owner, state.scoped_reducers))
                .map(|c| (c.clone(), state.tree.get(&c.slice).cloned()))
                .collect()
        };

        let changed: Vec<(StateContribution, Value)> = work
            .into_iter()
            .filter_map(|(contribution, previous)| {
                let next = (contribution.reducer)(previous.as_ref(), &action);
                if previous.as_ref() == Some(&next) {
                    None
                } else {
                    Some((contribution, next))
                }
            })
            .collect();

        log::trace!(
            "dispatch '{}' changed {} slice(s)",
            action.kind,
            changed.len()
        );
        if changed.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.lock()?;
            for (contribution, next) in changed {
                if state.active.contains_key(&contribution.slice) {
                    state.tree.insert(contribution.slice.clone(), next);
                    state.mark_changed(&contribution.scope);
                }
            }
        }

        match mode {
            FlushMode::Immediate => self.flush(),
            FlushMode::Deferred => self.schedule_flush(),
        }
    }

    fn schedule_flush(&self) -> RuntimeResult<()> {
        {
            let mut state = self.lock()?;
            if state.flush_scheduled || state.phase == FlushPhase::Flushing {
                // a running flush picks the new pending state up itself
                return Ok(());
            }
            state.flush_scheduled = true;
        }
        let scheduler = Arc::clone(&*lock_or(&self.inner.scheduler, RuntimeError::internal)?);
        scheduler.schedule(self.clone());
        Ok(())
    }

    /// Deliver every pending notification
    pub fn flush(&self) -> RuntimeResult<()> {
        {
            let mut state = self.lock()?;
            state.flush_scheduled = false;
            if state.phase == FlushPhase::Flushing {
                state.flush_again = true;
                return Ok(());
            }
            state.phase = FlushPhase::Flushing;
        }

        let mut guard = FlushGuard {
            store: self,
            finished: false,
        };
        let outcome = self.flush_rounds();
        guard.finished = outcome.is_ok();
        outcome
    }

    fn flush_rounds(&self) -> RuntimeResult<()> {
        let mut rounds = 0usize;
        loop {
            let (observables, broadcast, memos) = {
                let mut state = self.lock()?;
                state.flush_again = false;
                if !state.has_pending() {
                    state.phase = FlushPhase::Idle;
                    log::trace!("flush finished after {} round(s)", rounds);
                    return Ok(());
                }
                let observables: Vec<String> = state.pending_observables.drain(..).collect();
                let broadcast = std::mem::take(&mut state.pending_broadcast);
                let memos: Vec<Arc<dyn MemoCache>> = state
                    .memos
                    .values()
                    .map(|memo| Arc::clone(&memo.cache))
                    .collect();
                (observables, broadcast, memos)
            };
            rounds += 1;

            for memo in &memos {
                if memo.should_clear() {
                    memo.clear();
                }
            }

            for name in &observables {
                let subscribers: Vec<Listener> = {
                    let mut state = self.lock()?;
                    let value = state.select(name);
                    let observable = state.observables.entry(name.clone()).or_default();
                    observable.cached = Some(value);
                    observable.subscribers.values().cloned().collect()
                };
                subscribers.iter().for_each(|listener| listener());
            }

            if broadcast {
                let subscribers: Vec<Listener> = {
                    let state = self.lock()?;
                    state.broadcast_subscribers.values().cloned().collect()
                };
                subscribers.iter().for_each(|listener| listener());
            }
        }
    }

    /// Whether notifications are waiting for a flush
    pub fn has_pending(&self) -> RuntimeResult<bool> {
        Ok(self.lock()?.has_pending())
    }

    /// Called once per flush in which any broadcasting slice changed
    pub fn subscribe(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> RuntimeResult<SubscriptionId> {
        let id = SubscriptionId::next();
        self.lock()?
            .broadcast_subscribers
            .insert(id, Arc::new(listener));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> RuntimeResult<bool> {
        let mut state = self.lock()?;
        if state.broadcast_subscribers.shift_remove(&id).is_some() {
            return Ok(true);
        }
        Ok(state
            .observables
            .values_mut()
            .any(|observable| observable.subscribers.shift_remove(&id).is_some()))
    }

    /// Handle to a named observable
    pub fn observable(&self, name: impl Into<String>) -> ObservableState {
        ObservableState {
            name: name.into(),
            store: self.clone(),
        }
    }

    /// Memoize `func`, caching per `resolver` key, cleared on every flush
    pub fn memoize<A, R>(
        &self,
        resolver: impl Fn(&A) -> String + Send + Sync + 'static,
        func: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> RuntimeResult<Memoized<A, R>>
    where
        A: 'static,
        R: Send + Sync + 'static,
    {
        self.memoize_with(resolver, func, MemoOptions::default())
    }

    pub fn memoize_with<A, R>(
        &self,
        resolver: impl Fn(&A) -> String + Send + Sync + 'static,
        func: impl Fn(&A) -> R + Send + Sync + 'static,
        options: MemoOptions,
    ) -> RuntimeResult<Memoized<A, R>>
    where
        A: 'static,
        R: Send + Sync + 'static,
    {
        let weak_inner: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let host: Weak<dyn MemoHost> = weak_inner;
        let (memoized, cache) = Memoized::build(func, resolver, options.should_clear, host);
        self.lock()?.memos.insert(
            memoized.id(),
            MemoRegistration {
                owner: options.owner,
                cache,
            },
        );
        Ok(memoized)
    }

    pub fn memo_count(&self) -> RuntimeResult<usize> {
        Ok(self.lock()?.memos.len())
    }
}

/// Cached view of the slices routed to one observable
#[derive(Clone)]
pub struct ObservableState {
    name: String,
    store: Store,
}

impl fmt::Debug for ObservableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableState")
            .field("name", &self.name)
            .finish()
    }
}

impl ObservableState {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached value, computed on first use and refreshed by each flush that
    /// finds this observable pending
    pub fn current(&self) -> RuntimeResult<Value> {
        let mut state = self.store.lock()?;
        if let Some(cached) = state
            .observables
            .get(&self.name)
            .and_then(|observable| observable.cached.clone())
        {
            return Ok(cached);
        }
        let value = state.select(&self.name);
        state.observables.entry(self.name.clone()).or_default().cached = Some(value.clone());
        Ok(value)
    }

    pub fn subscribe(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> RuntimeResult<SubscriptionId> {
        let id = SubscriptionId::next();
        self.store
            .lock()?
            .observables
            .entry(self.name.clone())
            .or_default()
            .subscribers
            .insert(id, Arc::new(listener));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> RuntimeResult<bool> {
        Ok(self
            .store
            .lock()?
            .observables
            .get_mut(&self.name)
            .map(|observable| observable.subscribers.shift_remove(&id).is_some())
            .unwrap_or(false))
    }
}
