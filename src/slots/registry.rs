//! Slot Registry
//!
//! Holds every extension slot and every capability entry. A capability entry
//! is a slot of kind [`SlotKind::Capability`] that accepts at most one item;
//! it is ready once that item exists.
//!
//! The registry never calls user code. Listeners, visibility predicates and
//! discard predicates are handed back to the caller, which runs them after
//! releasing the registry lock.

use crate::error::{RuntimeError, RuntimeResult};
use crate::slots::key::{AnyKey, KeyId};
use crate::types::SubscriptionId;
use indexmap::IndexMap;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Visibility predicate attached to a contribution
pub type VisibilityFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub(crate) type SharedValue = Arc<dyn Any + Send + Sync>;
pub(crate) type SlotListener = Arc<dyn Fn() + Send + Sync>;
pub(crate) type SharedSlotRegistry = Arc<Mutex<SlotRegistry>>;

/// What a registry entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Ordered collection of contributions from any module
    Extension,
    /// At most one contribution, the capability value
    Capability,
}

#[derive(Clone)]
pub(crate) struct StoredItem {
    pub id: u64,
    pub owner: String,
    pub value: SharedValue,
    pub visible: VisibilityFn,
    pub name: Option<String>,
}

impl StoredItem {
    pub fn is_visible(&self) -> bool {
        (self.visible)()
    }
}

struct SlotEntry {
    key: AnyKey,
    owner: Option<String>,
    kind: SlotKind,
    items: Vec<StoredItem>,
    listeners: IndexMap<SubscriptionId, SlotListener>,
}

impl SlotEntry {
    fn listeners(&self) -> Vec<SlotListener> {
        self.listeners.values().cloned().collect()
    }
}

/// Introspection view of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSummary {
    pub name: String,
    pub kind: SlotKind,
    pub owner: Option<String>,
    pub public: bool,
    pub items: usize,
}

/// Registry of extension slots and capability entries
#[derive(Default)]
pub(crate) struct SlotRegistry {
    /// First public key registered per `(name, version)`
    own_keys: HashMap<(String, Option<u32>), AnyKey>,
    slots: IndexMap<KeyId, SlotEntry>,
    /// Slot and capability entries share one namespace
    names: HashMap<String, KeyId>,
    next_item: u64,
}

impl std::fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field(
                "slots",
                &self
                    .slots
                    .values()
                    .map(|entry| entry.key.display_name())
                    .collect::<Vec<_>>(),
            )
            .field("own_keys", &self.own_keys.len())
            .finish()
    }
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key` to its own key, registering it when it is the first
    /// public key seen for its `(name, version)`
    pub fn resolve_key(&mut self, key: &AnyKey) -> AnyKey {
        if !key.is_public() {
            return key.clone();
        }
        self.own_keys
            .entry((key.name().to_string(), key.version()))
            .or_insert_with(|| key.clone())
            .clone()
    }

    /// Resolve without registering
    pub fn lookup_key(&self, key: &AnyKey) -> AnyKey {
        if !key.is_public() {
            return key.clone();
        }
        self.own_keys
            .get(&(key.name().to_string(), key.version()))
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    fn entry(&self, key: &AnyKey) -> Option<&SlotEntry> {
        self.slots.get(&self.lookup_key(key).id())
    }

    fn entry_mut(&mut self, key: &AnyKey) -> Option<&mut SlotEntry> {
        let id = self.lookup_key(key).id();
        self.slots.get_mut(&id)
    }

    fn slot_not_found(key: &AnyKey) -> RuntimeError {
        RuntimeError::SlotNotFound {
            key: key.display_name(),
        }
    }

    /// Declare a slot; fails on a key identity or name already in use
    pub fn declare(
        &mut self,
        key: &AnyKey,
        owner: Option<&str>,
        kind: SlotKind,
    ) -> RuntimeResult<AnyKey> {
        let own_key = self.resolve_key(key);
        let name = own_key.display_name();

        let existing = self
            .slots
            .get(&own_key.id())
            .or_else(|| {
                self.names
                    .get(&name)
                    .and_then(|id| self.slots.get(id))
            });
        if let Some(existing) = existing {
            return Err(RuntimeError::DuplicateSlot {
                key: name,
                owner: existing
                    .owner
                    .clone()
                    .unwrap_or_else(|| "<host>".to_string()),
            });
        }

        log::trace!(
            "declared {:?} slot '{}' (owner: {:?})",
            kind,
            name,
            owner
        );
        self.names.insert(name, own_key.id());
        self.slots.insert(
            own_key.id(),
            SlotEntry {
                key: own_key.clone(),
                owner: owner.map(str::to_string),
                kind,
                items: Vec::new(),
                listeners: IndexMap::new(),
            },
        );
        Ok(own_key)
    }

    pub fn contains(&self, key: &AnyKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn kind_of(&self, key: &AnyKey) -> Option<SlotKind> {
        self.entry(key).map(|entry| entry.kind)
    }

    /// Declaring module of a slot; `Ok(None)` for host-declared slots
    pub fn owner(&self, key: &AnyKey) -> RuntimeResult<Option<String>> {
        self.entry(key)
            .map(|entry| entry.owner.clone())
            .ok_or_else(|| Self::slot_not_found(key))
    }

    fn allocate_item(
        &mut self,
        owner: &str,
        value: SharedValue,
        visible: VisibilityFn,
        name: Option<String>,
    ) -> StoredItem {
        self.next_item += 1;
        StoredItem {
            id: self.next_item,
            owner: owner.to_string(),
            value,
            visible,
            name,
        }
    }

    /// Append an item; returns the listeners to notify
    pub fn contribute(
        &mut self,
        key: &AnyKey,
        owner: &str,
        value: SharedValue,
        visible: VisibilityFn,
        name: Option<String>,
    ) -> RuntimeResult<Vec<SlotListener>> {
        match self.entry(key).map(|entry| entry.kind) {
            None => return Err(Self::slot_not_found(key)),
            Some(SlotKind::Capability) => {
                return self
                    .contribute_capability(key, owner, value)
                    .map(|_| Vec::new())
            }
            Some(SlotKind::Extension) => {}
        }

        let item = self.allocate_item(owner, value, visible, name);
        let entry = self
            .entry_mut(key)
            .ok_or_else(|| Self::slot_not_found(key))?;
        entry.items.push(item);
        Ok(entry.listeners())
    }

    /// Record the single provider of a capability
    pub fn contribute_capability(
        &mut self,
        key: &AnyKey,
        owner: &str,
        value: SharedValue,
    ) -> RuntimeResult<AnyKey> {
        let own_key = match self.entry(key) {
            Some(entry) => {
                if let Some(existing) = entry.items.first() {
                    return Err(RuntimeError::CapabilityAlreadyContributed {
                        key: key.display_name(),
                        owner: existing.owner.clone(),
                    });
                }
                entry.key.clone()
            }
            None => self.declare(key, Some(owner), SlotKind::Capability)?,
        };

        let item = self.allocate_item(owner, value, Arc::new(|| true), None);
        if let Some(entry) = self.slots.get_mut(&own_key.id()) {
            entry.items.push(item);
        }
        log::debug!("capability '{}' provided by '{}'", own_key, owner);
        Ok(own_key)
    }

    /// All items in insertion order, hidden ones included
    pub fn items(&self, key: &AnyKey) -> RuntimeResult<Vec<StoredItem>> {
        self.entry(key)
            .map(|entry| entry.items.clone())
            .ok_or_else(|| Self::slot_not_found(key))
    }

    /// The ready value of a capability
    pub fn capability(&self, key: &AnyKey) -> Option<StoredItem> {
        self.entry(key)
            .filter(|entry| entry.kind == SlotKind::Capability && entry.items.len() == 1)
            .and_then(|entry| entry.items.first().cloned())
    }

    pub fn is_ready(&self, key: &AnyKey) -> bool {
        self.capability(key).is_some()
    }

    /// Module currently providing a capability
    pub fn provider_of(&self, key: &AnyKey) -> Option<String> {
        self.capability(key).map(|item| item.owner)
    }

    /// Remove the given items; listeners are returned only when the count changed
    pub fn discard_items(
        &mut self,
        key: &AnyKey,
        ids: &HashSet<u64>,
    ) -> RuntimeResult<(usize, Vec<SlotListener>)> {
        let entry = self
            .entry_mut(key)
            .ok_or_else(|| Self::slot_not_found(key))?;
        let before = entry.items.len();
        entry.items.retain(|item| !ids.contains(&item.id));
        let removed = before - entry.items.len();
        if removed == 0 {
            return Ok((0, Vec::new()));
        }
        Ok((removed, entry.listeners()))
    }

    /// Drop everything `owner` contributed, then every slot it declared
    ///
    /// Returns the listeners of surviving slots whose item count changed.
    pub fn discard_owner(&mut self, owner: &str) -> Vec<SlotListener> {
        let mut listeners = Vec::new();
        for entry in self.slots.values_mut() {
            let before = entry.items.len();
            entry.items.retain(|item| item.owner != owner);
            let changed = entry.items.len() != before;
            let owned = entry.owner.as_deref() == Some(owner);
            if changed && !owned {
                listeners.extend(entry.listeners());
            }
        }

        let removed: Vec<(String, KeyId)> = self
            .slots
            .values()
            .filter(|entry| entry.owner.as_deref() == Some(owner))
            .map(|entry| (entry.key.display_name(), entry.key.id()))
            .collect();
        for (name, id) in &removed {
            self.slots.shift_remove(id);
            if self.names.get(name) == Some(id) {
                self.names.remove(name);
            }
        }
        if !removed.is_empty() {
            log::trace!("removed {} slot(s) declared by '{}'", removed.len(), owner);
        }
        listeners
    }

    pub fn subscribe(
        &mut self,
        key: &AnyKey,
        listener: SlotListener,
    ) -> RuntimeResult<SubscriptionId> {
        let entry = self
            .entry_mut(key)
            .ok_or_else(|| Self::slot_not_found(key))?;
        let id = SubscriptionId::next();
        entry.listeners.insert(id, listener);
        Ok(id)
    }

    pub fn unsubscribe(&mut self, key: &AnyKey, id: SubscriptionId) -> bool {
        self.entry_mut(key)
            .map(|entry| entry.listeners.shift_remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Keys of every declared slot, in declaration order
    pub fn slot_keys(&self) -> Vec<AnyKey> {
        self.slots.values().map(|entry| entry.key.clone()).collect()
    }

    pub fn ready_capabilities(&self) -> Vec<AnyKey> {
        self.slots
            .values()
            .filter(|entry| entry.kind == SlotKind::Capability && entry.items.len() == 1)
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn summaries(&self) -> Vec<SlotSummary> {
        self.slots
            .values()
            .map(|entry| SlotSummary {
                name: entry.key.display_name(),
                kind: entry.kind,
                owner: entry.owner.clone(),
                public: entry.key.is_public(),
                items: entry.items.len(),
            })
            .collect()
    }

    /// A ready capability with the same name but a different key identity
    ///
    /// Used to explain dependencies that can never match, such as a private
    /// key copied into a second bundle.
    pub fn name_twin(&self, key: &AnyKey) -> Option<AnyKey> {
        let own_key = self.lookup_key(key);
        self.slots
            .values()
            .find(|entry| {
                entry.kind == SlotKind::Capability
                    && entry.key.id() != own_key.id()
                    && entry.key.same_capability(key)
            })
            .map(|entry| entry.key.clone())
    }
}
