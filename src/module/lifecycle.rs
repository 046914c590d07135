//! Lifecycle Orchestrator
//!
//! One ready batch goes through its phases together: every member attaches,
//! the store is rebuilt once, then every member extends. A failing handler
//! stops the batch where it is.

use crate::core::error_handling::log_error_with_context;
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::context::ModuleContext;
use crate::module::registry::{InstalledModule, ModuleEntry};
use crate::module::runtime::RuntimeInner;
use crate::module::traits::{LifecyclePhase, Module, ModuleState};
use std::sync::Arc;

struct BatchMember {
    name: String,
    module: Arc<dyn Module>,
    context: ModuleContext,
}

impl RuntimeInner {
    /// Take a batch of ready modules from resolved to extended
    pub(crate) fn run_batch(&self, batch: Vec<ModuleEntry>) -> RuntimeResult<()> {
        let members = self.admit(batch)?;
        let names: Vec<&str> = members.iter().map(|member| member.name.as_str()).collect();
        log::debug!("activating [{}]", names.join(", "));

        for member in &members {
            if self.still_installed(&member.name) {
                self.run_phase(LifecyclePhase::Attach, &member.module, &member.context)?;
                self.set_state(&member.name, ModuleState::Attached)?;
            }
        }

        self.store.rebuild()?;
        for member in &members {
            if self.still_installed(&member.name) {
                member.context.set_store_usable(true);
                member.context.set_capabilities_usable(true);
                self.set_state(&member.name, ModuleState::StoreReady)?;
            }
        }

        for member in &members {
            if self.still_installed(&member.name) {
                self.run_phase(LifecyclePhase::Extend, &member.module, &member.context)?;
                member.context.set_init_complete(true);
                self.set_state(&member.name, ModuleState::Extended)?;
            }
        }

        log::info!("activated module(s): {}", names.join(", "));
        Ok(())
    }

    /// Give each member its context and move it into the installed set
    fn admit(&self, batch: Vec<ModuleEntry>) -> RuntimeResult<Vec<BatchMember>> {
        let mut registry = self.lock_modules()?;
        let mut changes = self.lock_changes()?;
        Ok(batch
            .into_iter()
            .map(|entry| {
                let name = entry.name().to_string();
                let context = ModuleContext::new(
                    &name,
                    entry.dependencies.clone(),
                    entry.capabilities.clone(),
                    self.self_ref.clone(),
                );
                let member = BatchMember {
                    name: name.clone(),
                    module: Arc::clone(&entry.module),
                    context: context.clone(),
                };
                changes.installed(&name);
                registry.installed.insert(
                    name,
                    InstalledModule {
                        entry,
                        context,
                        state: ModuleState::DependenciesResolved,
                    },
                );
                member
            })
            .collect())
    }

    /// Run one handler, logging and wrapping its failure
    pub(crate) fn run_phase(
        &self,
        phase: LifecyclePhase,
        module: &Arc<dyn Module>,
        context: &ModuleContext,
    ) -> RuntimeResult<()> {
        log::trace!("module '{}': {}", module.name(), phase);
        phase.run(module, context).map_err(|cause| {
            log_error_with_context(&cause, &format!("Module '{}' {}", module.name(), phase));
            RuntimeError::PhaseFailed {
                module: module.name().to_string(),
                phase: phase.to_string(),
                cause: cause.to_string(),
            }
        })
    }

    pub(crate) fn set_state(&self, name: &str, state: ModuleState) -> RuntimeResult<()> {
        self.lock_modules()?.set_state(name, state);
        Ok(())
    }

    /// A handler earlier in the batch may have removed a later member
    fn still_installed(&self, name: &str) -> bool {
        self.has_module(name)
    }
}
