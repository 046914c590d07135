//! Typed slot handles
//!
//! [`ExtensionSlot<T>`] is what hosts and modules hold to read and write one
//! slot. Items come back as [`ExtensionItem<T>`] with the value behind an
//! `Arc<T>`; user predicates run only after the registry lock is released.

use crate::core::sync::lock_or;
use crate::error::{RuntimeError, RuntimeResult};
use crate::slots::key::SlotKey;
use crate::slots::registry::{SharedSlotRegistry, SlotListener, SlotRegistry, StoredItem, VisibilityFn};
use crate::types::SubscriptionId;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, MutexGuard, Weak};

/// One contribution to a slot
pub struct ExtensionItem<T> {
    id: u64,
    owner: String,
    value: Arc<T>,
    visible: VisibilityFn,
    name: Option<String>,
}

impl<T> ExtensionItem<T> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        (self.visible)()
    }
}

impl<T> Clone for ExtensionItem<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            owner: self.owner.clone(),
            value: Arc::clone(&self.value),
            visible: Arc::clone(&self.visible),
            name: self.name.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ExtensionItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionItem")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}

/// Optional settings for a contribution
#[derive(Default, Clone)]
pub struct Contribution {
    pub(crate) visible: Option<VisibilityFn>,
    pub(crate) name: Option<String>,
}

impl Contribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide the item whenever `predicate` returns false
    pub fn visible_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.visible = Some(Arc::new(predicate));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Handle to one declared slot
pub struct ExtensionSlot<T> {
    key: SlotKey<T>,
    registry: Weak<std::sync::Mutex<SlotRegistry>>,
}

impl<T> Clone for ExtensionSlot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            registry: Weak::clone(&self.registry),
        }
    }
}

impl<T> fmt::Debug for ExtensionSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSlot").field("key", &self.key).finish()
    }
}

impl<T: Send + Sync + 'static> ExtensionSlot<T> {
    pub(crate) fn new(key: SlotKey<T>, registry: &SharedSlotRegistry) -> Self {
        Self {
            key,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn key(&self) -> &SlotKey<T> {
        &self.key
    }

    fn with_registry<R>(
        &self,
        f: impl FnOnce(&mut MutexGuard<'_, SlotRegistry>) -> RuntimeResult<R>,
    ) -> RuntimeResult<R> {
        let registry = self.registry.upgrade().ok_or(RuntimeError::RuntimeDropped)?;
        let mut guard = lock_or(&registry, RuntimeError::internal)?;
        f(&mut guard)
    }

    /// Module that declared the slot, `None` for host slots
    pub fn owner(&self) -> RuntimeResult<Option<String>> {
        self.with_registry(|registry| registry.owner(self.key.as_any()))
    }

    /// Append an always-visible item owned by `owner`
    pub fn contribute(&self, owner: &str, value: T) -> RuntimeResult<()> {
        self.contribute_with(owner, value, Contribution::default())
    }

    pub fn contribute_with(
        &self,
        owner: &str,
        value: T,
        contribution: Contribution,
    ) -> RuntimeResult<()> {
        let visible = contribution.visible.unwrap_or_else(|| Arc::new(|| true));
        let listeners = self.with_registry(|registry| {
            registry.contribute(
                self.key.as_any(),
                owner,
                Arc::new(value),
                visible,
                contribution.name,
            )
        })?;
        log::trace!("'{}' contributed to slot '{}'", owner, self.key.as_any());
        notify(listeners);
        Ok(())
    }

    fn typed(&self, item: StoredItem) -> RuntimeResult<ExtensionItem<T>> {
        let value = item
            .value
            .downcast::<T>()
            .map_err(|_| RuntimeError::TypeMismatch {
                key: self.key.as_any().display_name(),
            })?;
        Ok(ExtensionItem {
            id: item.id,
            owner: item.owner,
            value,
            visible: item.visible,
            name: item.name,
        })
    }

    fn snapshot(&self) -> RuntimeResult<Vec<ExtensionItem<T>>> {
        let stored = self.with_registry(|registry| registry.items(self.key.as_any()))?;
        stored.into_iter().map(|item| self.typed(item)).collect()
    }

    /// Items in insertion order; hidden ones only with `include_hidden`
    pub fn items(&self, include_hidden: bool) -> RuntimeResult<Vec<ExtensionItem<T>>> {
        let mut items = self.snapshot()?;
        if !include_hidden {
            items.retain(ExtensionItem::is_visible);
        }
        Ok(items)
    }

    /// Values only, visible items
    pub fn values(&self) -> RuntimeResult<Vec<Arc<T>>> {
        Ok(self
            .items(false)?
            .into_iter()
            .map(|item| item.value)
            .collect())
    }

    /// First visible item
    pub fn single_item(&self) -> RuntimeResult<Option<ExtensionItem<T>>> {
        Ok(self.items(false)?.into_iter().next())
    }

    /// First visible item with the given name
    pub fn item_by_name(&self, name: &str) -> RuntimeResult<Option<ExtensionItem<T>>> {
        Ok(self
            .items(false)?
            .into_iter()
            .find(|item| item.name() == Some(name)))
    }

    /// Remove every item matching `predicate`; returns how many went
    pub fn discard_by(
        &self,
        predicate: impl Fn(&ExtensionItem<T>) -> bool,
    ) -> RuntimeResult<usize> {
        let doomed: HashSet<u64> = self
            .snapshot()?
            .iter()
            .filter(|item| predicate(item))
            .map(|item| item.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let (removed, listeners) =
            self.with_registry(|registry| registry.discard_items(self.key.as_any(), &doomed))?;
        notify(listeners);
        Ok(removed)
    }

    /// Call `listener` after every contribution and every count-changing discard
    pub fn subscribe(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> RuntimeResult<SubscriptionId> {
        self.with_registry(|registry| registry.subscribe(self.key.as_any(), Arc::new(listener)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> RuntimeResult<bool> {
        self.with_registry(|registry| Ok(registry.unsubscribe(self.key.as_any(), id)))
    }
}

pub(crate) fn notify(listeners: Vec<SlotListener>) {
    for listener in listeners {
        listener();
    }
}
