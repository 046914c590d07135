//! Module removal and teardown
//!
//! Removing a module also detaches everything that transitively depends on
//! a capability it provides. Dependents detach first. Dependents the caller
//! did not name go back to pending and re-activate once a provider returns.

use crate::error::{RuntimeError, RuntimeResult};
use crate::module::registry::{ModuleEntry, ModuleRegistry};
use crate::module::runtime::RuntimeInner;
use crate::module::traits::{LifecyclePhase, ModuleState};
use crate::slots::api::AnyKey;
use crate::slots::registry::SlotRegistry;
use crate::slots::slot::notify;
use indexmap::IndexSet;

struct RemovalPlan {
    /// Installed modules to detach, dependents first
    order: Vec<String>,
    /// Dependents to return to pending afterwards
    requeue: Vec<ModuleEntry>,
    /// Pending or lazy registrations to drop
    unregister: Vec<String>,
}

/// Module providing `dependency` right now, falling back to the declarer
fn provider_name(
    dependency: &AnyKey,
    registry: &ModuleRegistry,
    slots: &SlotRegistry,
) -> Option<String> {
    slots
        .provider_of(dependency)
        .or_else(|| registry.installed_provider(dependency).map(str::to_string))
}

/// Does installed module `dependent` rely on installed module `provider`?
fn relies_on(
    dependent: &str,
    provider: &str,
    registry: &ModuleRegistry,
    slots: &SlotRegistry,
) -> bool {
    registry.installed.get(dependent).is_some_and(|installed| {
        installed
            .entry
            .dependencies
            .iter()
            .any(|dependency| provider_name(dependency, registry, slots).as_deref() == Some(provider))
    })
}

/// Order `set` so that nothing detaches before a module that relies on it
///
/// On failure returns the residual set that still depends on itself.
fn detach_order(
    set: &IndexSet<String>,
    registry: &ModuleRegistry,
    slots: &SlotRegistry,
) -> Result<Vec<String>, Vec<String>> {
    let mut remaining = set.clone();
    let mut order = Vec::with_capacity(set.len());
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .find(|candidate| {
                !remaining.iter().any(|other| {
                    other != *candidate && relies_on(other, candidate, registry, slots)
                })
            })
            .cloned();
        match next {
            Some(name) => {
                remaining.shift_remove(&name);
                order.push(name);
            }
            None => return Err(remaining.into_iter().collect()),
        }
    }
    Ok(order)
}

impl RuntimeInner {
    /// Remove named modules on behalf of the host (`None`) or a module
    pub(crate) fn remove(&self, names: &[&str], requester: Option<&str>) -> RuntimeResult<()> {
        self.batched(|| {
            let plan = self.plan_removal(names, requester)?;
            for name in &plan.order {
                self.detach_module(name)?;
            }
            if !plan.order.is_empty() {
                log::info!("removed module(s): {}", plan.order.join(", "));
                self.store.rebuild()?;
            }
            if !plan.unregister.is_empty() {
                log::debug!(
                    "dropped pending or lazy module(s): {}",
                    plan.unregister.join(", ")
                );
            }
            self.requeue(plan.requeue)?;
            self.resolve_pending()
        })
    }

    /// Validate every name and work out the full detach set before touching anything
    fn plan_removal(&self, names: &[&str], requester: Option<&str>) -> RuntimeResult<RemovalPlan> {
        let mut registry = self.lock_modules()?;
        let slots = self.lock_slots()?;

        let mut targets: IndexSet<String> = IndexSet::new();
        let mut unregister = Vec::new();
        for name in names {
            let installed_by = if let Some(installed) = registry.installed.get(*name) {
                targets.insert(name.to_string());
                installed.entry.installed_by.clone()
            } else if let Some(entry) = registry.pending.get(*name) {
                unregister.push(name.to_string());
                entry.installed_by.clone()
            } else if registry.lazy.contains_key(*name) {
                unregister.push(name.to_string());
                None
            } else {
                return Err(RuntimeError::ModuleNotFound {
                    name: name.to_string(),
                });
            };

            if let Some(requester) = requester {
                if installed_by.as_deref() != Some(requester) {
                    return Err(RuntimeError::OwnershipViolation {
                        requester: requester.to_string(),
                        owner: installed_by.unwrap_or_else(|| "<host>".to_string()),
                        resource: format!("module '{}'", name),
                    });
                }
            }
        }

        let mut closure = targets.clone();
        loop {
            let dependents: Vec<String> = registry
                .installed
                .keys()
                .filter(|name| !closure.contains(*name))
                .filter(|name| {
                    closure
                        .iter()
                        .any(|removed| relies_on(name, removed, &registry, &slots))
                })
                .cloned()
                .collect();
            if dependents.is_empty() {
                break;
            }
            closure.extend(dependents);
        }

        let order = detach_order(&closure, &registry, &slots).map_err(|residual| {
            RuntimeError::UnresolvableDetach {
                modules: residual.join(", "),
            }
        })?;

        let requeue = closure
            .iter()
            .filter(|name| !targets.contains(*name))
            .filter_map(|name| registry.installed.get(name))
            .map(|installed| installed.entry.clone())
            .collect();

        for name in &unregister {
            registry.pending.shift_remove(name);
            registry.lazy.shift_remove(name);
        }

        Ok(RemovalPlan {
            order,
            requeue,
            unregister,
        })
    }

    /// Run a module's detach handler and discard everything it owns
    pub(crate) fn detach_module(&self, name: &str) -> RuntimeResult<()> {
        let installed = match self.lock_modules()?.installed.get(name) {
            Some(installed) => installed.clone(),
            None => return Ok(()),
        };

        self.run_phase(
            LifecyclePhase::Detach,
            &installed.entry.module,
            &installed.context,
        )?;
        installed.context.set_init_complete(false);
        installed.context.set_capabilities_usable(false);
        installed.context.set_store_usable(false);

        let listeners = self.lock_slots()?.discard_owner(name);
        self.store.remove_contributions(name)?;
        let memos = self.store.unregister_memos_of(name)?;
        if memos > 0 {
            log::trace!("unregistered {} memoized function(s) of '{}'", memos, name);
        }

        {
            let mut registry = self.lock_modules()?;
            registry.set_state(name, ModuleState::Detached);
            registry.installed.shift_remove(name);
        }
        self.lock_changes()?.removed(name);
        notify(listeners);
        log::debug!("module '{}' detached", name);
        Ok(())
    }

    fn requeue(&self, entries: Vec<ModuleEntry>) -> RuntimeResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut registry = self.lock_modules()?;
        for entry in entries {
            if registry.has_name(entry.name()) {
                continue;
            }
            log::debug!("module '{}' back to pending", entry.name());
            registry.pending.insert(entry.name().to_string(), entry);
        }
        Ok(())
    }

    /// Detach everything and forget pending and lazy registrations
    pub(crate) fn shutdown(&self) -> RuntimeResult<()> {
        self.batched(|| {
            let order = {
                let mut registry = self.lock_modules()?;
                registry.pending.clear();
                registry.lazy.clear();
                let slots = self.lock_slots()?;
                let everything: IndexSet<String> = registry.installed.keys().cloned().collect();
                match detach_order(&everything, &registry, &slots) {
                    Ok(order) => order,
                    Err(residual) => {
                        log::warn!(
                            "no dependency-safe detach order for [{}]; detaching in reverse install order",
                            residual.join(", ")
                        );
                        everything.into_iter().rev().collect()
                    }
                }
            };

            for name in &order {
                self.detach_module(name)?;
            }
            self.store.rebuild()?;
            log::info!("runtime shut down ({} module(s) detached)", order.len());
            Ok(())
        })
    }
}
