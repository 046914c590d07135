//! Module Context
//!
//! The handle a module uses to talk to the runtime. There is exactly one
//! context per installed module; clones share it. Its enablement flags are
//! flipped by the lifecycle orchestrator only:
//!
//! | flag                | attach | extend | after extend |
//! |---------------------|--------|--------|--------------|
//! | store usable        | false  | true   | true         |
//! | capabilities usable | false  | true   | true         |
//! | init complete       | false  | false  | true         |

use crate::core::sync::lock_or;
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::descriptor::ModuleSpec;
use crate::module::runtime::RuntimeInner;
use crate::slots::api::{AnyKey, CapabilityKey, Contribution, ExtensionSlot, Key, SlotKey, SlotKind};
use crate::store::api::{
    Action, FlushMode, MemoOptions, Memoized, ObservableState, StateContribution,
};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct ContextFlags {
    store_usable: AtomicBool,
    capabilities_usable: AtomicBool,
    init_complete: AtomicBool,
}

struct ContextInner {
    name: String,
    dependencies: Vec<AnyKey>,
    capabilities: Vec<AnyKey>,
    flags: ContextFlags,
    runtime: Weak<RuntimeInner>,
}

/// Capability-scoped, lifecycle-aware handle of one module
#[derive(Clone)]
pub struct ModuleContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.inner.name)
            .field("store_usable", &self.is_store_usable())
            .field("capabilities_usable", &self.is_capabilities_usable())
            .field("init_complete", &self.is_init_complete())
            .finish()
    }
}

/// Restores the init-complete flag when a late initializer returns or unwinds
struct InitCompleteGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for InitCompleteGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

impl ModuleContext {
    pub(crate) fn new(
        name: &str,
        dependencies: Vec<AnyKey>,
        capabilities: Vec<AnyKey>,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                dependencies,
                capabilities,
                flags: ContextFlags::default(),
                runtime,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dependency set recorded when the module's dependencies resolved
    pub fn dependencies(&self) -> &[AnyKey] {
        &self.inner.dependencies
    }

    pub fn is_store_usable(&self) -> bool {
        self.inner.flags.store_usable.load(Ordering::SeqCst)
    }

    pub fn is_capabilities_usable(&self) -> bool {
        self.inner.flags.capabilities_usable.load(Ordering::SeqCst)
    }

    pub fn is_init_complete(&self) -> bool {
        self.inner.flags.init_complete.load(Ordering::SeqCst)
    }

    pub(crate) fn set_store_usable(&self, usable: bool) {
        self.inner.flags.store_usable.store(usable, Ordering::SeqCst);
    }

    pub(crate) fn set_capabilities_usable(&self, usable: bool) {
        self.inner
            .flags
            .capabilities_usable
            .store(usable, Ordering::SeqCst);
    }

    pub(crate) fn set_init_complete(&self, complete: bool) {
        self.inner.flags.init_complete.store(complete, Ordering::SeqCst);
    }

    fn runtime(&self) -> RuntimeResult<Arc<RuntimeInner>> {
        self.inner.runtime.upgrade().ok_or(RuntimeError::RuntimeDropped)
    }

    fn may_read(&self, key: &AnyKey) -> bool {
        self.inner
            .dependencies
            .iter()
            .chain(self.inner.capabilities.iter())
            .any(|allowed| allowed.matches(key))
    }

    // Capabilities

    /// Provide a declared capability; may unblock pending modules
    pub fn provide<T: Send + Sync + 'static>(
        &self,
        key: &CapabilityKey<T>,
        value: T,
    ) -> RuntimeResult<()> {
        if !self
            .inner
            .capabilities
            .iter()
            .any(|declared| declared.matches(key.as_any()))
        {
            return Err(RuntimeError::UndeclaredCapability {
                module: self.name().to_string(),
                key: key.as_any().display_name(),
            });
        }
        let runtime = self.runtime()?;
        {
            let mut slots = lock_or(&runtime.slots, RuntimeError::internal)?;
            slots.contribute_capability(key.as_any(), self.name(), Arc::new(value))?;
        }
        runtime.resolve_pending_batched()
    }

    /// Read a ready capability
    ///
    /// Refused before the attach phase completes, and for keys outside the
    /// module's dependencies and declarations when enforcement is on.
    pub fn get_capability<T: Send + Sync + 'static>(
        &self,
        key: &CapabilityKey<T>,
    ) -> RuntimeResult<Arc<T>> {
        if !self.is_capabilities_usable() {
            return Err(RuntimeError::CapabilitiesNotReady {
                module: self.name().to_string(),
                key: key.as_any().display_name(),
            });
        }
        let runtime = self.runtime()?;
        if runtime.config.enforce_dependency_declarations && !self.may_read(key.as_any()) {
            return Err(RuntimeError::UndeclaredDependency {
                module: self.name().to_string(),
                key: key.as_any().display_name(),
            });
        }
        runtime.capability(key)
    }

    pub fn has_capability<T: ?Sized>(&self, key: &Key<T>) -> bool {
        self.runtime()
            .map(|runtime| runtime.has_capability(key.as_any()))
            .unwrap_or(false)
    }

    // Slots

    /// Declare a slot owned by this module
    pub fn declare_slot<T: Send + Sync + 'static>(
        &self,
        key: &SlotKey<T>,
    ) -> RuntimeResult<ExtensionSlot<T>> {
        let runtime = self.runtime()?;
        let own_key = lock_or(&runtime.slots, RuntimeError::internal)?.declare(
            key.as_any(),
            Some(self.name()),
            SlotKind::Extension,
        )?;
        Ok(ExtensionSlot::new(Key::from_any(own_key), &runtime.slots))
    }

    /// Full access to a slot this module declared
    ///
    /// Slots declared by other modules are off limits; host-declared slots
    /// are open to every module.
    pub fn get_slot<T: Send + Sync + 'static>(
        &self,
        key: &SlotKey<T>,
    ) -> RuntimeResult<ExtensionSlot<T>> {
        let runtime = self.runtime()?;
        let owner = lock_or(&runtime.slots, RuntimeError::internal)?.owner(key.as_any())?;
        match owner {
            Some(owner) if owner != self.name() => Err(RuntimeError::OwnershipViolation {
                requester: self.name().to_string(),
                owner,
                resource: format!("slot '{}'", key.as_any().display_name()),
            }),
            _ => Ok(ExtensionSlot::new(key.clone(), &runtime.slots)),
        }
    }

    /// Contribute an always-visible item to any slot
    pub fn contribute<T: Send + Sync + 'static>(&self, key: &SlotKey<T>, value: T) -> RuntimeResult<()> {
        self.contribute_with(key, value, Contribution::default())
    }

    pub fn contribute_with<T: Send + Sync + 'static>(
        &self,
        key: &SlotKey<T>,
        value: T,
        contribution: Contribution,
    ) -> RuntimeResult<()> {
        let runtime = self.runtime()?;
        ExtensionSlot::new(key.clone(), &runtime.slots).contribute_with(self.name(), value, contribution)
    }

    // Store

    /// Add a state slice; it joins the tree at the next store build
    pub fn contribute_state(&self, contribution: StateContribution) -> RuntimeResult<()> {
        self.runtime()?.store.contribute(self.name(), contribution)
    }

    fn check_store(&self) -> RuntimeResult<Arc<RuntimeInner>> {
        if !self.is_store_usable() {
            return Err(RuntimeError::StoreNotReady {
                module: self.name().to_string(),
            });
        }
        self.runtime()
    }

    pub fn state(&self) -> RuntimeResult<Value> {
        self.check_store()?.store.state()
    }

    pub fn slice(&self, name: &str) -> RuntimeResult<Option<Value>> {
        self.check_store()?.store.slice(name)
    }

    /// Dispatch an action scoped to this module
    pub fn dispatch(&self, action: Action) -> RuntimeResult<()> {
        self.dispatch_with(action, FlushMode::Deferred)
    }

    pub fn dispatch_with(&self, action: Action, mode: FlushMode) -> RuntimeResult<()> {
        self.runtime()?
            .store
            .dispatch_with(action.scoped_to(self.name()), mode)
    }

    /// Dispatch an unscoped action every reducer sees
    pub fn dispatch_global(&self, action: Action) -> RuntimeResult<()> {
        self.runtime()?.store.dispatch(action)
    }

    pub fn observable(&self, name: impl Into<String>) -> RuntimeResult<ObservableState> {
        Ok(self.runtime()?.store.observable(name))
    }

    /// Memoized function unregistered when this module detaches
    pub fn memoize<A, R>(
        &self,
        resolver: impl Fn(&A) -> String + Send + Sync + 'static,
        func: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> RuntimeResult<Memoized<A, R>>
    where
        A: 'static,
        R: Send + Sync + 'static,
    {
        self.memoize_with(resolver, func, MemoOptions::new())
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
        self.runtime()?
            .store
            .memoize_with(resolver, func, options.owned_by(self.name()))
    }

    // Modules

    /// Install modules owned by this module
    pub fn add_modules(&self, specs: impl IntoIterator<Item = ModuleSpec>) -> RuntimeResult<()> {
        self.runtime()?
            .install(specs.into_iter().collect(), Some(self.name()))
    }

    /// Remove modules this module installed
    pub fn remove_modules(&self, names: &[&str]) -> RuntimeResult<()> {
        self.runtime()?.remove(names, Some(self.name()))
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.runtime()
            .map(|runtime| runtime.has_module(name))
            .unwrap_or(false)
    }

    /// Run `setup` as if it were still part of the extend phase
    ///
    /// The init-complete flag reads false while `setup` runs and is restored
    /// afterwards, also when `setup` fails or panics.
    pub fn late_init<R>(
        &self,
        setup: impl FnOnce(&ModuleContext) -> RuntimeResult<R>,
    ) -> RuntimeResult<R> {
        let flag = &self.inner.flags.init_complete;
        let _restore = InitCompleteGuard {
            flag,
            previous: flag.swap(false, Ordering::SeqCst),
        };
        setup(self)
    }
}
