//! Module Trait System
//!
//! A module is an independently authored unit with a unique name, optional
//! capability dependencies and declarations, and three optional lifecycle
//! handlers. Handlers that are not overridden are no-ops.
//!
//! # Lifecycle
//!
//! `Pending` → `DependenciesResolved` → `Attached` → `StoreReady` →
//! `Extended` → `Detached`
//!
//! - **attach**: declare slots, provide capabilities, contribute state.
//!   Capability reads and store reads are refused here.
//! - **extend**: everything is usable; the module is init-complete afterwards.
//! - **detach**: runs before the module's contributions are discarded.

use crate::error::RuntimeResult;
use crate::module::context::ModuleContext;
use crate::slots::api::AnyKey;
use serde::Serialize;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumIter};

/// Base trait every module implements
pub trait Module: Send + Sync {
    /// Globally unique module name
    fn name(&self) -> &str;

    /// Layer names, at most one per configured layer dimension
    fn layer(&self) -> Vec<String> {
        Vec::new()
    }

    /// Capabilities that must be ready before this module runs
    ///
    /// Must be pure; the runtime may call it more than once.
    fn dependencies(&self) -> Vec<AnyKey> {
        Vec::new()
    }

    /// Capabilities this module provides
    fn declared_capabilities(&self) -> Vec<AnyKey> {
        Vec::new()
    }

    /// Check if this module can run under the given module API version
    fn is_compatible(&self, _api_version: u32) -> bool {
        true
    }

    fn attach(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }

    fn extend(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }

    fn detach(&self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }
}

/// The handler-bearing phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum LifecyclePhase {
    Attach,
    Extend,
    Detach,
}

impl LifecyclePhase {
    /// Invoke this phase's handler on `module`
    pub fn run(self, module: &Arc<dyn Module>, ctx: &ModuleContext) -> RuntimeResult<()> {
        match self {
            LifecyclePhase::Attach => module.attach(ctx),
            LifecyclePhase::Extend => module.extend(ctx),
            LifecyclePhase::Detach => module.detach(ctx),
        }
    }
}

/// Where a module is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
pub enum ModuleState {
    /// Waiting for dependencies
    Pending,
    DependenciesResolved,
    Attached,
    StoreReady,
    /// Fully initialised
    Extended,
    Detached,
}

impl ModuleState {
    pub fn is_active(&self) -> bool {
        !matches!(self, ModuleState::Pending | ModuleState::Detached)
    }
}
