//! Module Registry
//!
//! Installed, pending and lazily registered modules. Names are unique across
//! all three sets at all times.

use crate::error::{RuntimeError, RuntimeResult};
use crate::module::context::ModuleContext;
use crate::module::lazy::LazyModule;
use crate::module::traits::{Module, ModuleState};
use crate::slots::api::AnyKey;
use indexmap::IndexMap;
use std::sync::Arc;

/// What the registry keeps per module, whatever its state
#[derive(Clone)]
pub(crate) struct ModuleEntry {
    pub module: Arc<dyn Module>,
    pub dependencies: Vec<AnyKey>,
    pub capabilities: Vec<AnyKey>,
    /// Installing module, `None` for the host
    pub installed_by: Option<String>,
}

impl ModuleEntry {
    /// Query a module's pure dependency functions once
    pub fn new(module: Arc<dyn Module>, installed_by: Option<String>) -> Self {
        Self {
            dependencies: module.dependencies(),
            capabilities: module.declared_capabilities(),
            module,
            installed_by,
        }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn declares(&self, key: &AnyKey) -> bool {
        self.capabilities.iter().any(|declared| declared.matches(key))
    }

    pub fn depends_on(&self, key: &AnyKey) -> bool {
        self.dependencies.iter().any(|dependency| dependency.matches(key))
    }
}

#[derive(Clone)]
pub(crate) struct InstalledModule {
    pub entry: ModuleEntry,
    pub context: ModuleContext,
    pub state: ModuleState,
}

#[derive(Default)]
pub(crate) struct ModuleRegistry {
    pub installed: IndexMap<String, InstalledModule>,
    pub pending: IndexMap<String, ModuleEntry>,
    pub lazy: IndexMap<String, LazyModule>,
    /// A resolution pass is running
    pub resolving: bool,
    /// Something changed during the running pass; go round again
    pub resolve_again: bool,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("installed", &self.installed.keys().collect::<Vec<_>>())
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("lazy", &self.lazy.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known in any form
    pub fn has_name(&self, name: &str) -> bool {
        self.installed.contains_key(name)
            || self.pending.contains_key(name)
            || self.lazy.contains_key(name)
    }

    /// Reject any name already known, or repeated within `names`
    pub fn check_unique<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> RuntimeResult<()> {
        let mut batch = std::collections::HashSet::new();
        for name in names {
            if self.has_name(name) || !batch.insert(name) {
                return Err(RuntimeError::DuplicateModule {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn state_of(&self, name: &str) -> Option<ModuleState> {
        if let Some(installed) = self.installed.get(name) {
            return Some(installed.state);
        }
        self.pending.get(name).map(|_| ModuleState::Pending)
    }

    pub fn set_state(&mut self, name: &str, state: ModuleState) {
        if let Some(installed) = self.installed.get_mut(name) {
            log::trace!("module '{}': {} -> {}", name, installed.state, state);
            installed.state = state;
        }
    }

    /// Installed module that currently declares `key`
    pub fn installed_provider(&self, key: &AnyKey) -> Option<&str> {
        self.installed
            .values()
            .find(|installed| installed.entry.declares(key))
            .map(|installed| installed.entry.name())
    }

    /// Pending module that declares `key`
    pub fn pending_provider(&self, key: &AnyKey) -> Option<&ModuleEntry> {
        self.pending.values().find(|entry| entry.declares(key))
    }
}
