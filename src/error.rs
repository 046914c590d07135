//! Runtime Error Types
//!
//! Every fatal condition the runtime reports, each carrying the names a
//! developer needs to locate the problem without further lookups.

use crate::core::error_handling::ContextualError;

/// Result type alias for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by the module runtime
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// A module name is already installed, pending or registered as lazy
    #[error("Module '{name}' is already registered")]
    DuplicateModule { name: String },

    /// A slot with the same key or the same name already exists
    #[error("Slot '{key}' is already declared (owner: {owner})")]
    DuplicateSlot { key: String, owner: String },

    /// Two modules contributed state under the same slice name
    #[error("State slice '{slice}' is already contributed by module '{owner}'")]
    DuplicateStateSlice { slice: String, owner: String },

    #[error("Slot '{key}' is not declared")]
    SlotNotFound { key: String },

    /// The capability has no active contribution
    #[error("Capability '{key}' is not available")]
    CapabilityNotFound { key: String },

    #[error("Capability '{key}' was already contributed by module '{owner}'")]
    CapabilityAlreadyContributed { key: String, owner: String },

    /// A module contributed a capability it does not declare
    #[error("Module '{module}' contributed capability '{key}' without declaring it")]
    UndeclaredCapability { module: String, key: String },

    /// A module read a capability outside its dependency set
    #[error("Module '{module}' requested capability '{key}' which is not among its declared dependencies")]
    UndeclaredDependency { module: String, key: String },

    #[error("Unknown layer '{layer}' referenced by '{referenced_by}'")]
    UnknownLayer { layer: String, referenced_by: String },

    #[error("Module '{module}' on layer '{module_layer}' cannot depend on capability '{key}' on higher layer '{key_layer}'")]
    LayerViolation {
        module: String,
        module_layer: String,
        key: String,
        key_layer: String,
    },

    /// Declared capabilities form a dependency cycle
    #[error("Circular dependency between capabilities: {path}")]
    CyclicDependency { path: String },

    /// A module touched something owned by another module
    #[error("Module '{requester}' cannot access {resource} owned by module '{owner}'")]
    OwnershipViolation {
        requester: String,
        owner: String,
        resource: String,
    },

    /// The module was built against an API version this runtime cannot host
    #[error("Module '{module}' is not compatible with module API version {api_version}")]
    IncompatibleModule { module: String, api_version: u32 },

    #[error("Module '{name}' not found")]
    ModuleNotFound { name: String },

    /// A lifecycle handler returned an error
    #[error("Module '{module}' failed during '{phase}': {cause}")]
    PhaseFailed {
        module: String,
        phase: String,
        cause: String,
    },

    #[error("Failed to load lazy module '{name}': {cause}")]
    LazyLoadFailed { name: String, cause: String },

    /// Capability reads are not allowed yet in the module's current phase
    #[error("Module '{module}' cannot read capability '{key}' before its attach phase has completed")]
    CapabilitiesNotReady { module: String, key: String },

    #[error("Module '{module}' cannot read store state before the store is built")]
    StoreNotReady { module: String },

    /// Removal could not find a safe detach order
    #[error("Cannot detach modules [{modules}]: they still depend on each other")]
    UnresolvableDetach { modules: String },

    /// Pending modules wait for capabilities nothing can provide
    #[error("Unreachable dependencies: {details}")]
    UnreachableDependencies { details: String },

    #[error("Value stored under '{key}' is not of the requested type")]
    TypeMismatch { key: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal runtime error: {message}")]
    Internal { message: String },

    #[error("Runtime has been dropped")]
    RuntimeDropped,

    /// Failure raised by module code
    #[error("{message}")]
    Generic { message: String },
}

impl RuntimeError {
    /// Error for module-authored failures inside lifecycle handlers
    pub fn generic(message: impl Into<String>) -> Self {
        RuntimeError::Generic {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: String) -> Self {
        RuntimeError::Internal { message }
    }
}

impl ContextualError for RuntimeError {
    fn is_user_actionable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::Internal { .. } | RuntimeError::RuntimeDropped
        )
    }

    fn user_message(&self) -> Option<String> {
        if self.is_user_actionable() {
            Some(self.to_string())
        } else {
            None
        }
    }
}
