//! State contributions

use crate::store::action::Action;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Pure reducer over one slice of the state tree
///
/// Receives `None` the first time, when the slice is created.
pub type Reducer = Arc<dyn Fn(Option<&Value>, &Action) -> Value + Send + Sync>;

/// Who hears about changes to a slice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationScope {
    /// Every store subscriber
    Broadcasting,
    /// Only subscribers of the named observable
    Observable(String),
}

/// One module's reducer for one named slice
#[derive(Clone)]
pub struct StateContribution {
    pub(crate) slice: String,
    pub(crate) owner: String,
    pub(crate) reducer: Reducer,
    pub(crate) scope: NotificationScope,
}

impl StateContribution {
    pub fn new(
        slice: impl Into<String>,
        reducer: impl Fn(Option<&Value>, &Action) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            slice: slice.into(),
            owner: String::new(),
            reducer: Arc::new(reducer),
            scope: NotificationScope::Broadcasting,
        }
    }

    /// Route change notifications to the named observable only
    pub fn observable(mut self, name: impl Into<String>) -> Self {
        self.scope = NotificationScope::Observable(name.into());
        self
    }

    pub(crate) fn owned_by(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn slice(&self) -> &str {
        &self.slice
    }

    pub fn scope(&self) -> &NotificationScope {
        &self.scope
    }
}

impl fmt::Debug for StateContribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContribution")
            .field("slice", &self.slice)
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .finish()
    }
}
