//! Shared helpers for store tests

use crate::store::api::{Action, StateContribution};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counter slice: `increment` adds the payload (default 1), `noop` changes nothing
pub fn counter(slice: &str) -> StateContribution {
    StateContribution::new(slice, |state: Option<&Value>, action: &Action| {
        let current = state.and_then(Value::as_i64).unwrap_or(0);
        match action.kind.as_str() {
            "increment" => json!(current + action.payload.as_i64().unwrap_or(1)),
            _ => json!(current),
        }
    })
}

/// Listener that counts its calls
pub fn call_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    (calls, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

pub fn count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}
