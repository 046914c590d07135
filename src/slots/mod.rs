//! Capability Registry
//!
//! Typed keys, own-key resolution for public keys, and the extension slot
//! registry that also stores every contributed capability.

// Internal modules - all access should go through api module
pub(crate) mod key;
pub(crate) mod registry;
pub(crate) mod slot;

// Public API module
pub mod api;
