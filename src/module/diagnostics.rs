//! Runtime diagnostics
//!
//! A serializable snapshot of what is installed, what is waiting and why,
//! plus a verification pass that finds pending modules no current or
//! pending provider can ever unblock.

use crate::core::version::{build_time, get_api_version, git_hash};
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::registry::{ModuleEntry, ModuleRegistry};
use crate::module::runtime::Runtime;
use crate::module::traits::ModuleState;
use crate::slots::api::{AnyKey, SlotSummary};
use crate::slots::registry::SlotRegistry;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDiagnostics {
    pub api_version: u32,
    pub build_time: String,
    pub git_hash: String,
    pub installed: Vec<InstalledModuleInfo>,
    pub pending: Vec<PendingModuleInfo>,
    pub lazy: Vec<String>,
    pub capabilities: Vec<CapabilityInfo>,
    pub slots: Vec<SlotSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledModuleInfo {
    pub name: String,
    pub state: ModuleState,
    /// `None` when the host installed it
    pub installed_by: Option<String>,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingModuleInfo {
    pub name: String,
    pub missing: Vec<MissingDependency>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub provider: String,
    pub public: bool,
}

/// One dependency a pending module is still waiting for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub capability: String,
    /// Pending module that declares it, if any
    pub provided_by_pending: Option<String>,
    /// Why it may never match
    pub hint: Option<String>,
}

fn missing_dependencies(
    entry: &ModuleEntry,
    registry: &ModuleRegistry,
    slots: &SlotRegistry,
) -> Vec<MissingDependency> {
    entry
        .dependencies
        .iter()
        .filter(|dependency| !slots.is_ready(dependency))
        .map(|dependency| MissingDependency {
            capability: dependency.display_name(),
            provided_by_pending: registry
                .pending_provider(dependency)
                .map(|provider| provider.name().to_string()),
            hint: key_mismatch_hint(dependency, slots),
        })
        .collect()
}

/// Explain a same-named capability that cannot satisfy `key`
fn key_mismatch_hint(key: &AnyKey, slots: &SlotRegistry) -> Option<String> {
    let twin = slots.name_twin(key)?;
    Some(format!(
        "'{}' is provided under a different {} key; keys shared across bundles must be public on both sides",
        twin.display_name(),
        if twin.is_public() { "public" } else { "private" }
    ))
}

fn keys(keys: &[AnyKey]) -> Vec<String> {
    keys.iter().map(AnyKey::display_name).collect()
}

/// Pending modules that can never activate with what is installed or pending
fn unreachable_modules(registry: &ModuleRegistry, slots: &SlotRegistry) -> Vec<String> {
    let mut viable: HashSet<&str> = registry.pending.keys().map(String::as_str).collect();
    loop {
        let dropped: Vec<&str> = registry
            .pending
            .values()
            .filter(|entry| viable.contains(entry.name()))
            .filter(|entry| {
                !entry.dependencies.iter().all(|dependency| {
                    slots.is_ready(dependency)
                        || registry.pending.values().any(|provider| {
                            viable.contains(provider.name()) && provider.declares(dependency)
                        })
                })
            })
            .map(ModuleEntry::name)
            .collect();
        if dropped.is_empty() {
            break;
        }
        for name in dropped {
            viable.remove(name);
        }
    }
    registry
        .pending
        .keys()
        .filter(|name| !viable.contains(name.as_str()))
        .cloned()
        .collect()
}

impl Runtime {
    pub fn diagnostics(&self) -> RuntimeResult<RuntimeDiagnostics> {
        let registry = self.inner.lock_modules()?;
        let slots = self.inner.lock_slots()?;

        let installed = registry
            .installed
            .values()
            .map(|installed| InstalledModuleInfo {
                name: installed.entry.name().to_string(),
                state: installed.state,
                installed_by: installed.entry.installed_by.clone(),
                dependencies: keys(&installed.entry.dependencies),
                capabilities: keys(&installed.entry.capabilities),
            })
            .collect();
        let pending = registry
            .pending
            .values()
            .map(|entry| PendingModuleInfo {
                name: entry.name().to_string(),
                missing: missing_dependencies(entry, &registry, &slots),
            })
            .collect();
        let capabilities = slots
            .ready_capabilities()
            .into_iter()
            .filter_map(|key| {
                slots.provider_of(&key).map(|provider| CapabilityInfo {
                    name: key.display_name(),
                    provider,
                    public: key.is_public(),
                })
            })
            .collect();

        Ok(RuntimeDiagnostics {
            api_version: get_api_version(),
            build_time: build_time().to_string(),
            git_hash: git_hash().to_string(),
            installed,
            pending,
            lazy: registry.lazy.keys().cloned().collect(),
            capabilities,
            slots: slots.summaries(),
        })
    }

    /// Dependencies a module is still waiting for; empty once it is active
    pub fn why_unready(&self, name: &str) -> RuntimeResult<Vec<MissingDependency>> {
        let registry = self.inner.lock_modules()?;
        let slots = self.inner.lock_slots()?;
        if registry.installed.contains_key(name) {
            return Ok(Vec::new());
        }
        let entry = registry
            .pending
            .get(name)
            .ok_or_else(|| RuntimeError::ModuleNotFound {
                name: name.to_string(),
            })?;
        Ok(missing_dependencies(entry, &registry, &slots))
    }

    /// Report pending modules whose dependencies can never be provided
    pub fn verify_dependencies(&self) -> RuntimeResult<()> {
        let registry = self.inner.lock_modules()?;
        let slots = self.inner.lock_slots()?;
        let stuck = unreachable_modules(&registry, &slots);
        if stuck.is_empty() {
            return Ok(());
        }

        let details = stuck
            .iter()
            .filter_map(|name| registry.pending.get(name))
            .map(|entry| {
                let missing = missing_dependencies(entry, &registry, &slots)
                    .into_iter()
                    .map(|missing| match missing.hint {
                        Some(hint) => format!("'{}' ({})", missing.capability, hint),
                        None => format!("'{}'", missing.capability),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("module '{}' waits for {}", entry.name(), missing)
            })
            .collect::<Vec<_>>()
            .join("; ");
        log::warn!("unreachable dependencies: {}", details);
        Err(RuntimeError::UnreachableDependencies { details })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::ModuleDescriptor;
    use crate::slots::api::Key;
    use std::sync::Arc;

    fn pending(registry: &mut ModuleRegistry, name: &str, declares: Option<&Key<u32>>, depends: &Key<u32>) {
        let mut builder = ModuleDescriptor::builder(name).depends_on(depends);
        if let Some(key) = declares {
            builder = builder.declares(key);
        }
        registry.pending.insert(
            name.to_string(),
            ModuleEntry::new(Arc::new(builder.build()), None),
        );
    }

    #[test]
    fn test_chain_behind_missing_provider_is_unreachable() {
        let a: Key<u32> = Key::new("A");
        let missing: Key<u32> = Key::new("Missing");
        let mut registry = ModuleRegistry::new();
        pending(&mut registry, "a", Some(&a), &missing);
        pending(&mut registry, "b", None, &a);

        let slots = SlotRegistry::new();
        assert_eq!(unreachable_modules(&registry, &slots), vec!["a", "b"]);
    }

    #[test]
    fn test_private_key_twin_hint() {
        let provided: Key<u32> = Key::new("Clock");
        let wanted: Key<u32> = Key::new("Clock");
        let mut slots = SlotRegistry::new();
        slots
            .contribute_capability(provided.as_any(), "clock", Arc::new(1u32))
            .unwrap();

        let hint = key_mismatch_hint(wanted.as_any(), &slots).unwrap();
        assert!(hint.contains("must be public"));
    }
}
