//! Closure-based module descriptors and installable specs

use crate::error::RuntimeResult;
use crate::module::context::ModuleContext;
use crate::module::lazy::LazyModule;
use crate::module::traits::{LifecyclePhase, Module};
use crate::slots::api::{AnyKey, Key};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type PhaseHandler = Arc<dyn Fn(&ModuleContext) -> RuntimeResult<()> + Send + Sync>;

/// A module assembled from a table of optional phase handlers
pub struct ModuleDescriptor {
    name: String,
    layer: Vec<String>,
    dependencies: Vec<AnyKey>,
    capabilities: Vec<AnyKey>,
    handlers: HashMap<LifecyclePhase, PhaseHandler>,
}

impl ModuleDescriptor {
    pub fn builder(name: impl Into<String>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder {
            descriptor: ModuleDescriptor {
                name: name.into(),
                layer: Vec::new(),
                dependencies: Vec::new(),
                capabilities: Vec::new(),
                handlers: HashMap::new(),
            },
        }
    }

    fn handle(&self, phase: LifecyclePhase, ctx: &ModuleContext) -> RuntimeResult<()> {
        match self.handlers.get(&phase) {
            Some(handler) => handler(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("layer", &self.layer)
            .field("dependencies", &self.dependencies)
            .field("capabilities", &self.capabilities)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Module for ModuleDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> Vec<String> {
        self.layer.clone()
    }

    fn dependencies(&self) -> Vec<AnyKey> {
        self.dependencies.clone()
    }

    fn declared_capabilities(&self) -> Vec<AnyKey> {
        self.capabilities.clone()
    }

    fn attach(&self, ctx: &ModuleContext) -> RuntimeResult<()> {
        self.handle(LifecyclePhase::Attach, ctx)
    }

    fn extend(&self, ctx: &ModuleContext) -> RuntimeResult<()> {
        self.handle(LifecyclePhase::Extend, ctx)
    }

    fn detach(&self, ctx: &ModuleContext) -> RuntimeResult<()> {
        self.handle(LifecyclePhase::Detach, ctx)
    }
}

pub struct ModuleDescriptorBuilder {
    descriptor: ModuleDescriptor,
}

impl ModuleDescriptorBuilder {
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.descriptor.layer.push(layer.into());
        self
    }

    pub fn depends_on<T: ?Sized>(mut self, key: &Key<T>) -> Self {
        self.descriptor.dependencies.push(key.erased());
        self
    }

    pub fn declares<T: ?Sized>(mut self, key: &Key<T>) -> Self {
        self.descriptor.capabilities.push(key.erased());
        self
    }

    pub fn on(
        mut self,
        phase: LifecyclePhase,
        handler: impl Fn(&ModuleContext) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.handlers.insert(phase, Arc::new(handler));
        self
    }

    pub fn on_attach(
        self,
        handler: impl Fn(&ModuleContext) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.on(LifecyclePhase::Attach, handler)
    }

    pub fn on_extend(
        self,
        handler: impl Fn(&ModuleContext) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.on(LifecyclePhase::Extend, handler)
    }

    pub fn on_detach(
        self,
        handler: impl Fn(&ModuleContext) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.on(LifecyclePhase::Detach, handler)
    }

    pub fn build(self) -> ModuleDescriptor {
        self.descriptor
    }
}

/// Something `add_modules` accepts: a module, a lazy registration, or a
/// nested group of either
pub enum ModuleSpec {
    Module(Arc<dyn Module>),
    Lazy(LazyModule),
    Group(Vec<ModuleSpec>),
}

impl ModuleSpec {
    pub fn module(module: impl Module + 'static) -> Self {
        ModuleSpec::Module(Arc::new(module))
    }

    pub fn group(specs: impl IntoIterator<Item = ModuleSpec>) -> Self {
        ModuleSpec::Group(specs.into_iter().collect())
    }

    /// Depth-first flattening into immediate modules and lazy registrations
    pub(crate) fn flatten(specs: Vec<ModuleSpec>) -> (Vec<Arc<dyn Module>>, Vec<LazyModule>) {
        let mut modules = Vec::new();
        let mut lazy = Vec::new();
        let mut stack: Vec<ModuleSpec> = specs.into_iter().rev().collect();
        while let Some(spec) = stack.pop() {
            match spec {
                ModuleSpec::Module(module) => modules.push(module),
                ModuleSpec::Lazy(registration) => lazy.push(registration),
                ModuleSpec::Group(children) => stack.extend(children.into_iter().rev()),
            }
        }
        (modules, lazy)
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSpec::Module(module) => write!(f, "Module({})", module.name()),
            ModuleSpec::Lazy(lazy) => write!(f, "Lazy({})", lazy.name()),
            ModuleSpec::Group(children) => f.debug_list().entries(children).finish(),
        }
    }
}

impl From<ModuleDescriptor> for ModuleSpec {
    fn from(descriptor: ModuleDescriptor) -> Self {
        ModuleSpec::module(descriptor)
    }
}

impl From<Arc<dyn Module>> for ModuleSpec {
    fn from(module: Arc<dyn Module>) -> Self {
        ModuleSpec::Module(module)
    }
}

impl From<LazyModule> for ModuleSpec {
    fn from(lazy: LazyModule) -> Self {
        ModuleSpec::Lazy(lazy)
    }
}

impl From<Vec<ModuleSpec>> for ModuleSpec {
    fn from(specs: Vec<ModuleSpec>) -> Self {
        ModuleSpec::Group(specs)
    }
}
