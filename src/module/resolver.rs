//! Installation and dependency resolution
//!
//! New modules are validated as a batch, parked in the pending set, and then
//! activated in waves: every pending module whose dependencies are all
//! provided forms the next batch. A pass that is triggered while another is
//! running only flags the running one to go round again.

use crate::core::version::get_api_version;
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::{describe_first_cycle, Edge};
use crate::module::descriptor::ModuleSpec;
use crate::module::layers::check_layers;
use crate::module::lazy::LazyModule;
use crate::module::registry::{ModuleEntry, ModuleRegistry};
use crate::module::runtime::RuntimeInner;
use crate::module::traits::Module;
use crate::slots::api::AnyKey;
use crate::slots::registry::SlotRegistry;
use std::collections::HashSet;
use std::sync::Arc;

/// `declared capability -> dependency` edges, by capability name
fn capability_edges<'a>(entries: impl Iterator<Item = &'a ModuleEntry>) -> Vec<Edge> {
    let mut edges = Vec::new();
    for entry in entries {
        for declared in &entry.capabilities {
            for dependency in &entry.dependencies {
                edges.push((declared.display_name(), dependency.display_name()));
            }
        }
    }
    edges
}

/// Could `key` become available through pending modules, cycles allowed?
///
/// `path` holds the modules on the current search path; reaching one of
/// them again closes a cycle, which counts as satisfiable.
fn is_satisfiable<'a>(
    key: &AnyKey,
    registry: &'a ModuleRegistry,
    slots: &SlotRegistry,
    path: &mut HashSet<&'a str>,
) -> bool {
    if slots.is_ready(key) {
        return true;
    }
    let Some(provider) = registry.pending_provider(key) else {
        return false;
    };
    if !path.insert(provider.name()) {
        return true;
    }
    let satisfiable = provider
        .dependencies
        .iter()
        .all(|dependency| is_satisfiable(dependency, registry, slots, path));
    path.remove(provider.name());
    satisfiable
}

impl RuntimeInner {
    /// Validate and register a batch of modules, then resolve
    pub(crate) fn install(
        &self,
        specs: Vec<ModuleSpec>,
        installed_by: Option<&str>,
    ) -> RuntimeResult<()> {
        let (modules, lazy) = ModuleSpec::flatten(specs);
        self.register(modules, lazy, installed_by, false)
    }

    /// Install materialised lazy modules
    ///
    /// A lazy registration is claimed only once the module has passed
    /// validation, so a rejected module stays lazy and can be loaded again.
    /// Modules whose registration another caller already claimed are skipped.
    pub(crate) fn install_loaded(&self, modules: Vec<Arc<dyn Module>>) -> RuntimeResult<()> {
        self.register(modules, Vec::new(), None, true)
    }

    fn register(
        &self,
        modules: Vec<Arc<dyn Module>>,
        lazy: Vec<LazyModule>,
        installed_by: Option<&str>,
        claim_lazy: bool,
    ) -> RuntimeResult<()> {
        self.batched(|| {
            let api_version = get_api_version();

            let mut entries = Vec::with_capacity(modules.len());
            for module in modules {
                if !module.is_compatible(api_version) {
                    return Err(RuntimeError::IncompatibleModule {
                        module: module.name().to_string(),
                        api_version,
                    });
                }
                let entry = ModuleEntry::new(module, installed_by.map(str::to_string));
                check_layers(&self.config, &entry)?;
                entries.push(entry);
            }

            {
                let mut registry = self.lock_modules()?;
                if claim_lazy {
                    let mut seen = HashSet::new();
                    entries.retain(|entry| {
                        registry.lazy.contains_key(entry.name())
                            && seen.insert(entry.name().to_string())
                    });
                    if entries.is_empty() {
                        return Ok(());
                    }
                } else {
                    registry.check_unique(
                        entries
                            .iter()
                            .map(ModuleEntry::name)
                            .chain(lazy.iter().map(|module| module.name())),
                    )?;
                }

                if self.config.check_cycles && !self.config.cyclic_mode {
                    let edges = capability_edges(registry.pending.values().chain(entries.iter()));
                    if let Some(path) = describe_first_cycle(&edges) {
                        return Err(RuntimeError::CyclicDependency { path });
                    }
                }

                for module in lazy {
                    log::debug!("registered lazy module '{}'", module.name());
                    registry.lazy.insert(module.name().to_string(), module);
                }
                for entry in entries {
                    if claim_lazy {
                        registry.lazy.shift_remove(entry.name());
                    }
                    log::debug!(
                        "module '{}' pending ({} dependencies)",
                        entry.name(),
                        entry.dependencies.len()
                    );
                    registry.pending.insert(entry.name().to_string(), entry);
                }
            }

            self.resolve_pending()
        })
    }

    /// Activate every pending module whose dependencies can be met
    pub(crate) fn resolve_pending(&self) -> RuntimeResult<()> {
        {
            let mut registry = self.lock_modules()?;
            if registry.resolving {
                registry.resolve_again = true;
                return Ok(());
            }
            registry.resolving = true;
            registry.resolve_again = false;
        }

        let outcome = self.resolve_until_stable();

        if let Ok(mut registry) = self.lock_modules() {
            registry.resolving = false;
            registry.resolve_again = false;
        }
        outcome
    }

    fn resolve_until_stable(&self) -> RuntimeResult<()> {
        loop {
            let batch = self.take_ready()?;
            if batch.is_empty() {
                let mut registry = self.lock_modules()?;
                if registry.resolve_again {
                    registry.resolve_again = false;
                    continue;
                }
                if !registry.pending.is_empty() {
                    log::debug!(
                        "{} module(s) still pending: {}",
                        registry.pending.len(),
                        registry
                            .pending
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                return Ok(());
            }
            self.run_batch(batch)?;
        }
    }

    /// Remove the next batch of ready modules from the pending set
    fn take_ready(&self) -> RuntimeResult<Vec<ModuleEntry>> {
        let mut registry = self.lock_modules()?;
        let ready: Vec<String> = {
            let slots = self.lock_slots()?;
            registry
                .pending
                .values()
                .filter(|entry| self.is_ready(entry, &registry, &slots))
                .map(|entry| entry.name().to_string())
                .collect()
        };
        Ok(ready
            .iter()
            .filter_map(|name| registry.pending.shift_remove(name))
            .collect())
    }

    fn is_ready(&self, entry: &ModuleEntry, registry: &ModuleRegistry, slots: &SlotRegistry) -> bool {
        entry.dependencies.iter().all(|dependency| {
            if slots.is_ready(dependency) {
                return true;
            }
            if !self.config.cyclic_mode {
                return false;
            }
            let mut path = HashSet::from([entry.name()]);
            is_satisfiable(dependency, registry, slots, &mut path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::ModuleDescriptor;
    use crate::slots::api::Key;

    fn entry(name: &str, declares: &[&Key<u32>], depends: &[&Key<u32>]) -> ModuleEntry {
        let mut builder = ModuleDescriptor::builder(name);
        for key in declares {
            builder = builder.declares(*key);
        }
        for key in depends {
            builder = builder.depends_on(*key);
        }
        ModuleEntry::new(Arc::new(builder.build()), None)
    }

    #[test]
    fn test_capability_edges() {
        let a: Key<u32> = Key::new("A");
        let b: Key<u32> = Key::new("B");
        let module = entry("m", &[&a], &[&b]);
        assert_eq!(
            capability_edges([&module].into_iter()),
            vec![("A".to_string(), "B".to_string())]
        );
    }

    #[test]
    fn test_mutual_pending_dependencies_are_satisfiable() {
        let a: Key<u32> = Key::new("A");
        let b: Key<u32> = Key::new("B");
        let missing: Key<u32> = Key::new("Missing");

        let mut registry = ModuleRegistry::new();
        registry
            .pending
            .insert("a".to_string(), entry("a", &[&a], &[&b]));
        registry
            .pending
            .insert("b".to_string(), entry("b", &[&b], &[&a]));
        let slots = SlotRegistry::new();

        let mut path = HashSet::from(["a"]);
        assert!(is_satisfiable(b.as_any(), &registry, &slots, &mut path));

        registry
            .pending
            .insert("c".to_string(), entry("c", &[], &[&missing]));
        let mut path = HashSet::from(["c"]);
        assert!(!is_satisfiable(missing.as_any(), &registry, &slots, &mut path));
    }
}
