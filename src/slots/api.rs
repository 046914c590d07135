//! Public API for capability keys and extension slots

pub use crate::slots::key::{AnyKey, CapabilityKey, Key, KeyId, SlotKey};
pub use crate::slots::registry::{SlotKind, SlotSummary, VisibilityFn};
pub use crate::slots::slot::{Contribution, ExtensionItem, ExtensionSlot};
