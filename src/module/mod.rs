//! Module Runtime
//!
//! Registration, dependency resolution, the two-phase lifecycle and removal
//! of independently authored modules. Modules talk to the runtime only
//! through the [`api::ModuleContext`] handed to each lifecycle handler.

// Internal modules - all access should go through api module
pub(crate) mod context;
pub(crate) mod descriptor;
pub(crate) mod diagnostics;
pub(crate) mod events;
pub(crate) mod layers;
pub(crate) mod lazy;
pub(crate) mod lifecycle;
pub(crate) mod registry;
pub(crate) mod removal;
pub(crate) mod resolver;
pub(crate) mod runtime;
pub(crate) mod traits;

// Public API module
pub mod api;

#[cfg(test)]
mod tests;
