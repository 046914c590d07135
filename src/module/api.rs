//! Public API for modules and the runtime that hosts them

pub use crate::module::context::ModuleContext;
pub use crate::module::descriptor::{ModuleDescriptor, ModuleDescriptorBuilder, ModuleSpec};
pub use crate::module::diagnostics::{
    CapabilityInfo, InstalledModuleInfo, MissingDependency, PendingModuleInfo, RuntimeDiagnostics,
};
pub use crate::module::events::ModulesChanged;
pub use crate::module::lazy::{LazyModule, ModuleLoader};
pub use crate::module::runtime::Runtime;
pub use crate::module::traits::{LifecyclePhase, Module, ModuleState};
