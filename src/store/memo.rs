//! Memoized derived values
//!
//! A [`Memoized`] function caches results under a caller-supplied resolver
//! key. Each one is registered with the store, optionally under an owning
//! module, and the store clears every registered cache on flush unless its
//! `should_clear` predicate declines. Registrations are removed explicitly:
//! by [`Memoized::unregister`], on drop, or when the owning module detaches.

use crate::core::sync::lock_or;
use crate::error::{RuntimeError, RuntimeResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static NEXT_MEMO_ID: AtomicU64 = AtomicU64::new(1);

/// Registration id of a memoized function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoId(u64);

impl MemoId {
    fn next() -> Self {
        MemoId(NEXT_MEMO_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cache the store can clear on flush
pub(crate) trait MemoCache: Send + Sync {
    fn should_clear(&self) -> bool;
    fn clear(&self);
}

type ShouldClearFn = Box<dyn Fn() -> bool + Send + Sync>;

pub(crate) struct MemoInner<A, R> {
    func: Box<dyn Fn(&A) -> R + Send + Sync>,
    resolver: Box<dyn Fn(&A) -> String + Send + Sync>,
    should_clear: Option<ShouldClearFn>,
    cache: Mutex<HashMap<String, Arc<R>>>,
}

impl<A, R> MemoCache for MemoInner<A, R>
where
    A: 'static,
    R: Send + Sync + 'static,
{
    fn should_clear(&self) -> bool {
        self.should_clear.as_ref().map(|predicate| predicate()).unwrap_or(true)
    }

    fn clear(&self) {
        match self.cache.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Removes a registration from wherever the store keeps it
pub(crate) trait MemoHost: Send + Sync {
    fn unregister_memo(&self, id: MemoId);
}

/// Options for [`crate::store::Store::memoize_with`]
pub struct MemoOptions {
    pub(crate) owner: Option<String>,
    pub(crate) should_clear: Option<ShouldClearFn>,
}

impl MemoOptions {
    pub fn new() -> Self {
        Self {
            owner: None,
            should_clear: None,
        }
    }

    /// Unregister automatically when `module` detaches
    pub fn owned_by(mut self, module: impl Into<String>) -> Self {
        self.owner = Some(module.into());
        self
    }

    /// Keep the cache across a flush whenever `predicate` returns false
    pub fn should_clear(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_clear = Some(Box::new(predicate));
        self
    }
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A pure function with a flush-invalidated result cache
pub struct Memoized<A, R> {
    id: MemoId,
    inner: Arc<MemoInner<A, R>>,
    host: Weak<dyn MemoHost>,
}

impl<A, R> Memoized<A, R>
where
    A: 'static,
    R: Send + Sync + 'static,
{
    pub(crate) fn build(
        func: impl Fn(&A) -> R + Send + Sync + 'static,
        resolver: impl Fn(&A) -> String + Send + Sync + 'static,
        should_clear: Option<ShouldClearFn>,
        host: Weak<dyn MemoHost>,
    ) -> (Self, Arc<dyn MemoCache>) {
        let inner = Arc::new(MemoInner {
            func: Box::new(func),
            resolver: Box::new(resolver),
            should_clear,
            cache: Mutex::new(HashMap::new()),
        });
        let cache: Arc<dyn MemoCache> = inner.clone();
        (
            Self {
                id: MemoId::next(),
                inner,
                host,
            },
            cache,
        )
    }

    pub fn id(&self) -> MemoId {
        self.id
    }

    /// Cached result for the resolver key of `args`, computing it on a miss
    pub fn call(&self, args: &A) -> RuntimeResult<Arc<R>> {
        let key = (self.inner.resolver)(args);
        {
            let cache = lock_or(&self.inner.cache, RuntimeError::internal)?;
            if let Some(hit) = cache.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }

        let computed = Arc::new((self.inner.func)(args));
        let mut cache = lock_or(&self.inner.cache, RuntimeError::internal)?;
        Ok(Arc::clone(cache.entry(key).or_insert(computed)))
    }

    pub fn cached_entries(&self) -> usize {
        self.inner
            .cache
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    /// Stop receiving flush invalidations
    pub fn unregister(&self) {
        if let Some(host) = self.host.upgrade() {
            host.unregister_memo(self.id);
        }
    }
}

impl<A, R> Drop for Memoized<A, R> {
    fn drop(&mut self) {
        if let Some(host) = self.host.upgrade() {
            host.unregister_memo(self.id);
        }
    }
}

impl<A, R> fmt::Debug for Memoized<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized").field("id", &self.id).finish()
    }
}
