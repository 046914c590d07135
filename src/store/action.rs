//! Actions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of the action every reducer sees once when its slice is created
pub const INIT_ACTION: &str = "@@modhost/INIT";

/// A state change request
///
/// `scope` names the module that dispatched it. With scoped reducers
/// enabled, only that module's reducers see a scoped action; unscoped
/// actions reach everyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
            scope: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn scoped_to(mut self, module: impl Into<String>) -> Self {
        self.scope = Some(module.into());
        self
    }

    pub(crate) fn init() -> Self {
        Self::new(INIT_ACTION)
    }

    /// Whether a reducer owned by `owner` should see this action
    pub(crate) fn reaches(&self, owner: &str, scoped_reducers: bool) -> bool {
        match (&self.scope, scoped_reducers) {
            (Some(scope), true) => scope == owner,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_filtering() {
        let global = Action::new("tick");
        let scoped = Action::new("tick").scoped_to("clock");

        assert!(global.reaches("editor", true));
        assert!(scoped.reaches("clock", true));
        assert!(!scoped.reaches("editor", true));
        assert!(scoped.reaches("editor", false));
    }

    #[test]
    fn test_action_from_json() {
        let action: Action =
            serde_json::from_value(json!({"kind": "set", "payload": {"value": 3}})).unwrap();
        assert_eq!(action.kind, "set");
        assert_eq!(action.payload["value"], 3);
        assert!(action.scope.is_none());
    }
}
