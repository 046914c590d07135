//! Capability and slot keys
//!
//! A key is the identity of a contract. Private keys are identity-bound: two
//! keys built separately never match, even with equal names. Public keys are
//! unified by `(name, version)` through the slot registry's own-key table,
//! so independently built copies of one logical capability meet at the same
//! registry entry.

use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one concrete key object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct KeyId(u64);

#[derive(Debug, Clone)]
pub(crate) struct KeyInfo {
    id: KeyId,
    name: String,
    public: bool,
    layer: Vec<String>,
    version: Option<u32>,
}

/// Type-erased key, as used in dependency lists and the registry
#[derive(Clone)]
pub struct AnyKey(Arc<KeyInfo>);

impl AnyKey {
    fn create(name: impl Into<String>, public: bool) -> Self {
        AnyKey(Arc::new(KeyInfo {
            id: KeyId(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            public,
            layer: Vec::new(),
            version: None,
        }))
    }

    pub fn id(&self) -> KeyId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_public(&self) -> bool {
        self.0.public
    }

    /// Layer names this key lives on, one per configured dimension at most
    pub fn layer(&self) -> &[String] {
        &self.0.layer
    }

    pub fn version(&self) -> Option<u32> {
        self.0.version
    }

    /// `name` or `name@version`, used in messages and name-collision checks
    pub fn display_name(&self) -> String {
        match self.0.version {
            Some(version) => format!("{}@{}", self.0.name, version),
            None => self.0.name.clone(),
        }
    }

    /// Same logical capability: equal name and version
    pub fn same_capability(&self, other: &AnyKey) -> bool {
        self.name() == other.name() && self.version() == other.version()
    }

    /// Whether both keys resolve to one registry entry: two public keys of
    /// the same capability, or the very same key
    pub fn matches(&self, other: &AnyKey) -> bool {
        if self.is_public() && other.is_public() {
            self.same_capability(other)
        } else {
            self == other
        }
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyKey {}

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyKey")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("public", &self.0.public)
            .field("version", &self.0.version)
            .finish()
    }
}

impl fmt::Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Typed key; `T` is the value stored under it
pub struct Key<T: ?Sized> {
    inner: AnyKey,
    _marker: PhantomData<fn() -> T>,
}

/// Key of a capability a module provides or requires
pub type CapabilityKey<T> = Key<T>;

/// Key of an extension slot holding items of type `T`
pub type SlotKey<T> = Key<T>;

impl<T: ?Sized> Key<T> {
    /// Private key, matched by identity only
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_any(AnyKey::create(name, false))
    }

    /// Public key, unified with other public keys of the same name and version
    pub fn public(name: impl Into<String>) -> Self {
        Self::from_any(AnyKey::create(name, true))
    }

    pub fn with_version(mut self, version: u32) -> Self {
        Arc::make_mut(&mut self.inner.0).version = Some(version);
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner.0).layer.push(layer.into());
        self
    }

    pub(crate) fn from_any(inner: AnyKey) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Erased form, for dependency and declaration lists
    pub fn erased(&self) -> AnyKey {
        self.inner.clone()
    }

    pub fn as_any(&self) -> &AnyKey {
        &self.inner
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl<T: ?Sized> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self::from_any(self.inner.clone())
    }
}

impl<T: ?Sized> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T: ?Sized> From<&Key<T>> for AnyKey {
    fn from(key: &Key<T>) -> Self {
        key.erased()
    }
}
