pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod module;
pub mod slots;
pub mod store;
pub mod types;

pub use config::{LayerDimension, RuntimeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use module::api::{
    LazyModule, LifecyclePhase, Module, ModuleContext, ModuleDescriptor, ModuleSpec,
    ModuleState, ModulesChanged, Runtime,
};
pub use slots::api::{CapabilityKey, Contribution, ExtensionSlot, SlotKey};
pub use store::api::{Action, FlushMode, StateContribution, Store};
