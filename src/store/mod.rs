//! Reactive Store Coordinator
//!
//! One state tree composed from module contributions, with batched change
//! notification and flush-invalidated memoization.

// Internal modules - all access should go through api module
pub(crate) mod action;
pub(crate) mod coordinator;
pub(crate) mod memo;
pub(crate) mod reducer;
pub(crate) mod scheduler;

// Public API module
pub mod api;

pub use api::*;

#[cfg(test)]
mod tests;
