//! Modules-changed notifications
//!
//! An outward-facing operation (add, remove, load, a capability contribution
//! that unblocks modules) may install and remove many modules through nested
//! calls. Listeners hear about it once, when the outermost operation ends,
//! with the combined summary.

use crate::types::SubscriptionId;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// What one outward operation changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModulesChanged {
    /// Modules that became active, in activation order
    pub installed: Vec<String>,
    /// Modules that were detached, in detach order
    pub removed: Vec<String>,
}

impl ModulesChanged {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.removed.is_empty()
    }
}

pub(crate) type ChangeListener = Arc<dyn Fn(&ModulesChanged) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Idle,
    Batching,
}

pub(crate) struct ChangeTracker {
    state: BatchState,
    summary: ModulesChanged,
    listeners: IndexMap<SubscriptionId, ChangeListener>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
            summary: ModulesChanged::default(),
            listeners: IndexMap::new(),
        }
    }
}

impl ChangeTracker {
    /// Enter an operation; true when it is the outermost one
    pub fn begin(&mut self) -> bool {
        match self.state {
            BatchState::Idle => {
                self.state = BatchState::Batching;
                true
            }
            BatchState::Batching => false,
        }
    }

    /// Leave the outermost operation; returns what to deliver and to whom
    pub fn end(&mut self) -> Option<(ModulesChanged, Vec<ChangeListener>)> {
        self.state = BatchState::Idle;
        let summary = std::mem::take(&mut self.summary);
        if summary.is_empty() {
            return None;
        }
        Some((summary, self.listeners.values().cloned().collect()))
    }

    pub fn installed(&mut self, name: &str) {
        self.summary.installed.push(name.to_string());
    }

    pub fn removed(&mut self, name: &str) {
        self.summary.removed.push(name.to_string());
    }

    pub fn subscribe(&mut self, listener: ChangeListener) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.listeners.insert(id, listener);
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.shift_remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_operations_report_once() {
        let mut tracker = ChangeTracker::default();
        tracker.subscribe(Arc::new(|_| {}));

        assert!(tracker.begin());
        tracker.installed("a");
        assert!(!tracker.begin());
        tracker.installed("b");

        let (summary, listeners) = tracker.end().unwrap();
        assert_eq!(summary.installed, vec!["a", "b"]);
        assert_eq!(listeners.len(), 1);
        assert!(tracker.begin());
    }

    #[test]
    fn test_empty_operation_reports_nothing() {
        let mut tracker = ChangeTracker::default();
        assert!(tracker.begin());
        assert!(tracker.end().is_none());
    }
}
