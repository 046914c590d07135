//! Module Runtime
//!
//! [`Runtime`] is the host-facing handle. It owns the module registry, the
//! slot registry and the store, and is cheap to clone. All state sits behind
//! `std::sync::Mutex` guards that are released before any module code,
//! predicate, reducer or listener runs, so module code may call back into the
//! runtime from any phase.
//!
//! Lock order, where more than one is held: modules, slots, changes.

use crate::config::RuntimeConfig;
use crate::core::sync::lock_or;
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::descriptor::ModuleSpec;
use crate::module::events::{ChangeTracker, ModulesChanged};
use crate::module::lazy::SharedLoad;
use crate::module::registry::ModuleRegistry;
use crate::module::traits::{Module, ModuleState};
use crate::slots::api::{AnyKey, CapabilityKey, ExtensionSlot, Key, SlotKey, SlotKind};
use crate::slots::registry::{SharedSlotRegistry, SlotRegistry};
use crate::store::api::{FlushScheduler, Store};
use crate::types::SubscriptionId;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub(crate) struct RuntimeInner {
    pub config: RuntimeConfig,
    pub slots: SharedSlotRegistry,
    pub store: Store,
    pub modules: Mutex<ModuleRegistry>,
    pub changes: Mutex<ChangeTracker>,
    /// In-flight lazy loads by module name
    pub loads: Mutex<HashMap<String, SharedLoad>>,
    /// Handed to every context
    pub self_ref: Weak<RuntimeInner>,
}

impl RuntimeInner {
    pub fn lock_modules(&self) -> RuntimeResult<MutexGuard<'_, ModuleRegistry>> {
        lock_or(&self.modules, RuntimeError::internal)
    }

    pub fn lock_slots(&self) -> RuntimeResult<MutexGuard<'_, SlotRegistry>> {
        lock_or(&self.slots, RuntimeError::internal)
    }

    pub fn lock_changes(&self) -> RuntimeResult<MutexGuard<'_, ChangeTracker>> {
        lock_or(&self.changes, RuntimeError::internal)
    }

    /// Run an outward-facing operation; the outermost one delivers the
    /// modules-changed summary when it ends, whether it succeeded or not
    pub fn batched<R>(&self, operation: impl FnOnce() -> RuntimeResult<R>) -> RuntimeResult<R> {
        let outermost = self.lock_changes()?.begin();
        let outcome = operation();
        if outermost {
            let delivery = self.lock_changes()?.end();
            if let Some((summary, listeners)) = delivery {
                log::debug!(
                    "modules changed: +[{}] -[{}]",
                    summary.installed.join(", "),
                    summary.removed.join(", ")
                );
                for listener in listeners {
                    listener(&summary);
                }
            }
        }
        outcome
    }

    pub fn resolve_pending_batched(&self) -> RuntimeResult<()> {
        self.batched(|| self.resolve_pending())
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.lock_modules()
            .map(|registry| registry.installed.contains_key(name))
            .unwrap_or(false)
    }

    pub fn has_capability(&self, key: &AnyKey) -> bool {
        self.lock_slots()
            .map(|slots| slots.is_ready(key))
            .unwrap_or(false)
    }

    /// Join or start the load of a lazy module; `None` once it is materialised
    fn lazy_load(&self, name: &str) -> RuntimeResult<Option<SharedLoad>> {
        let registry = self.lock_modules()?;
        if registry.installed.contains_key(name) || registry.pending.contains_key(name) {
            return Ok(None);
        }
        let module = registry
            .lazy
            .get(name)
            .ok_or_else(|| RuntimeError::ModuleNotFound {
                name: name.to_string(),
            })?;
        let mut loads = lock_or(&self.loads, RuntimeError::internal)?;
        let load = loads
            .entry(name.to_string())
            .or_insert_with(|| module.start())
            .clone();
        Ok(Some(load))
    }

    pub fn capability<T: Send + Sync + 'static>(
        &self,
        key: &CapabilityKey<T>,
    ) -> RuntimeResult<Arc<T>> {
        let item = self
            .lock_slots()?
            .capability(key.as_any())
            .ok_or_else(|| RuntimeError::CapabilityNotFound {
                key: key.as_any().display_name(),
            })?;
        item.value
            .downcast::<T>()
            .map_err(|_| RuntimeError::TypeMismatch {
                key: key.as_any().display_name(),
            })
    }
}

/// Host-facing handle to one module runtime
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Runtime");
        if let Ok(registry) = self.inner.lock_modules() {
            debug.field("modules", &*registry);
        }
        debug.field("store", &self.inner.store).finish()
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let store = Store::new(config.scoped_reducers);
        let inner = Arc::new_cyclic(|self_ref| RuntimeInner {
            config,
            slots: Arc::new(Mutex::new(SlotRegistry::new())),
            store,
            modules: Mutex::new(ModuleRegistry::new()),
            changes: Mutex::new(ChangeTracker::default()),
            loads: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        });
        log::debug!(
            "runtime created (cycle checks: {}, cyclic mode: {}, layer dimensions: {})",
            inner.config.check_cycles,
            inner.config.cyclic_mode,
            inner.config.layers.len()
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Install modules and register lazy ones
    ///
    /// Fails before any phase runs on a duplicate name, an unknown layer, a
    /// layer violation, an incompatible module, or (with cycle checks on and
    /// cyclic mode off) a capability cycle among pending and new modules.
    /// Modules with unmet dependencies stay pending. A failing phase handler
    /// aborts the call; modules that already ran are not rolled back.
    pub fn add_modules(&self, specs: impl IntoIterator<Item = ModuleSpec>) -> RuntimeResult<()> {
        self.inner.install(specs.into_iter().collect(), None)
    }

    pub fn add_module(&self, module: impl Module + 'static) -> RuntimeResult<()> {
        self.add_modules([ModuleSpec::module(module)])
    }

    /// Materialise lazy modules and install them as one batch
    ///
    /// Callers asking for the same module at the same time share a single
    /// loader run. A failed load leaves the module registered as lazy.
    pub async fn load_lazy(&self, names: &[&str]) -> RuntimeResult<()> {
        let mut loads = Vec::with_capacity(names.len());
        for name in names {
            if let Some(load) = self.inner.lazy_load(name)? {
                loads.push((name.to_string(), load));
            }
        }
        if loads.is_empty() {
            return Ok(());
        }

        let results = join_all(loads.iter().map(|(_, load)| load.clone())).await;
        {
            let mut in_flight = lock_or(&self.inner.loads, RuntimeError::internal)?;
            for (name, _) in &loads {
                in_flight.remove(name);
            }
        }
        let modules = results.into_iter().collect::<RuntimeResult<Vec<_>>>()?;
        self.inner.install_loaded(modules)
    }

    /// Detach modules, their dependents first
    ///
    /// Dependents that were not named go back to pending and re-activate
    /// once their dependencies are provided again.
    pub fn remove_modules(&self, names: &[&str]) -> RuntimeResult<()> {
        self.inner.remove(names, None)
    }

    /// Installed, in any post-pending state
    pub fn has_module(&self, name: &str) -> bool {
        self.inner.has_module(name)
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.inner
            .lock_modules()
            .ok()
            .and_then(|registry| registry.state_of(name))
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.module_state(name) == Some(ModuleState::Pending)
    }

    pub fn is_lazy(&self, name: &str) -> bool {
        self.inner
            .lock_modules()
            .map(|registry| registry.lazy.contains_key(name))
            .unwrap_or(false)
    }

    /// Installed module names in activation order
    pub fn module_names(&self) -> RuntimeResult<Vec<String>> {
        Ok(self.inner.lock_modules()?.installed.keys().cloned().collect())
    }

    pub fn get_capability<T: Send + Sync + 'static>(
        &self,
        key: &CapabilityKey<T>,
    ) -> RuntimeResult<Arc<T>> {
        self.inner.capability(key)
    }

    pub fn has_capability<T: ?Sized>(&self, key: &Key<T>) -> bool {
        self.inner.has_capability(key.as_any())
    }

    /// Declare a host-owned slot, open to every module
    pub fn declare_slot<T: Send + Sync + 'static>(
        &self,
        key: &SlotKey<T>,
    ) -> RuntimeResult<ExtensionSlot<T>> {
        let own_key = self
            .inner
            .lock_slots()?
            .declare(key.as_any(), None, SlotKind::Extension)?;
        Ok(ExtensionSlot::new(Key::from_any(own_key), &self.inner.slots))
    }

    /// Any declared slot; the host is not subject to ownership checks
    pub fn get_slot<T: Send + Sync + 'static>(
        &self,
        key: &SlotKey<T>,
    ) -> RuntimeResult<ExtensionSlot<T>> {
        if !self.inner.lock_slots()?.contains(key.as_any()) {
            return Err(RuntimeError::SlotNotFound {
                key: key.as_any().display_name(),
            });
        }
        Ok(ExtensionSlot::new(key.clone(), &self.inner.slots))
    }

    /// Keys of every declared slot and capability entry
    pub fn all_slot_keys(&self) -> RuntimeResult<Vec<AnyKey>> {
        Ok(self.inner.lock_slots()?.slot_keys())
    }

    pub fn store(&self) -> Store {
        self.inner.store.clone()
    }

    /// Deliver pending store notifications
    pub fn flush(&self) -> RuntimeResult<()> {
        self.inner.store.flush()
    }

    pub fn set_flush_scheduler(&self, scheduler: Arc<dyn FlushScheduler>) -> RuntimeResult<()> {
        self.inner.store.set_scheduler(scheduler)
    }

    /// Called once per outward operation that installed or removed modules
    pub fn on_modules_changed(
        &self,
        listener: impl Fn(&ModulesChanged) + Send + Sync + 'static,
    ) -> RuntimeResult<SubscriptionId> {
        Ok(self.inner.lock_changes()?.subscribe(Arc::new(listener)))
    }

    pub fn off_modules_changed(&self, id: SubscriptionId) -> RuntimeResult<bool> {
        Ok(self.inner.lock_changes()?.unsubscribe(id))
    }

    /// Detach every module and drop pending and lazy registrations
    pub fn shutdown(&self) -> RuntimeResult<()> {
        self.inner.shutdown()
    }
}
