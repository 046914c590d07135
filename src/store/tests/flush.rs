//! Notification batching and flush reentrancy

use super::utils::{call_counter, count, counter};
use crate::store::api::{Action, FlushMode, FlushScheduler, Store, TokioFlush};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn built_store() -> Store {
    let store = Store::default();
    store.contribute("clock", counter("ticks")).unwrap();
    store
        .contribute("cursor", counter("position").observable("cursor"))
        .unwrap();
    store.rebuild().unwrap();
    store.flush().unwrap();
    store
}

#[test]
fn test_broadcast_once_per_flush() {
    let store = built_store();
    let (calls, listener) = call_counter();
    store.subscribe(listener).unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    store.dispatch(Action::new("increment")).unwrap();
    assert_eq!(count(&calls), 0);

    store.flush().unwrap();
    assert_eq!(count(&calls), 1);

    // nothing pending, nothing delivered
    store.flush().unwrap();
    assert_eq!(count(&calls), 1);
}

#[test]
fn test_removed_slice_refreshes_its_observable() {
    let store = built_store();
    let cursor = store.observable("cursor");
    assert_eq!(cursor.current().unwrap(), json!({"position": 0}));
    let (observed, listener) = call_counter();
    cursor.subscribe(listener).unwrap();

    assert_eq!(store.remove_contributions("cursor").unwrap(), 1);
    store.rebuild().unwrap();
    store.flush().unwrap();

    assert_eq!(count(&observed), 1);
    assert_eq!(cursor.current().unwrap(), json!({}));
    assert_eq!(store.state().unwrap(), json!({"ticks": 0}));
}

#[test]
fn test_panicking_subscriber_does_not_stall_later_flushes() {
    let store = built_store();
    let panicked = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&panicked);
    store
        .subscribe(move || {
            if !once.swap(true, Ordering::SeqCst) {
                panic!("subscriber failed");
            }
        })
        .unwrap();
    let (calls, listener) = call_counter();
    store.subscribe(listener).unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    assert!(catch_unwind(AssertUnwindSafe(|| store.flush())).is_err());
    assert!(panicked.load(Ordering::SeqCst));

    store.dispatch(Action::new("increment")).unwrap();
    store.flush().unwrap();
    assert_eq!(count(&calls), 1);
    assert_eq!(store.slice("ticks").unwrap(), Some(json!(2)));
}

#[test]
fn test_observable_changes_do_not_broadcast() {
    let store = Store::default();
    store
        .contribute("cursor", counter("position").observable("cursor"))
        .unwrap();
    store.rebuild().unwrap();
    store.flush().unwrap();

    let (broadcasts, broadcast_listener) = call_counter();
    store.subscribe(broadcast_listener).unwrap();
    let cursor = store.observable("cursor");
    let (observed, observable_listener) = call_counter();
    cursor.subscribe(observable_listener).unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    store.flush().unwrap();

    assert_eq!(count(&observed), 1);
    assert_eq!(count(&broadcasts), 0);
    assert_eq!(cursor.current().unwrap(), json!({"position": 1}));
}

#[test]
fn test_observable_value_cached_between_flushes() {
    let store = built_store();
    let cursor = store.observable("cursor");
    assert_eq!(cursor.current().unwrap(), json!({"position": 0}));

    store.dispatch(Action::new("increment")).unwrap();
    // cached until the flush recomputes it
    assert_eq!(cursor.current().unwrap(), json!({"position": 0}));
    store.flush().unwrap();
    assert_eq!(cursor.current().unwrap(), json!({"position": 1}));
}

#[test]
fn test_observables_notified_before_broadcast() {
    let store = built_store();
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&order);
    store
        .subscribe(move || log.lock().unwrap().push("broadcast"))
        .unwrap();
    let log = Arc::clone(&order);
    store
        .observable("cursor")
        .subscribe(move || log.lock().unwrap().push("cursor"))
        .unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    store.flush().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["cursor", "broadcast"]);
}

#[test]
fn test_subscriber_dispatch_during_flush_is_not_lost() {
    let store = built_store();
    let calls = Arc::new(AtomicUsize::new(0));

    let inner = store.clone();
    let seen = Arc::clone(&calls);
    store
        .subscribe(move || {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                inner
                    .dispatch_with(Action::new("increment"), FlushMode::Immediate)
                    .unwrap();
            }
        })
        .unwrap();

    store
        .dispatch_with(Action::new("increment"), FlushMode::Immediate)
        .unwrap();

    // the nested dispatch was delivered by a second round of the outer flush
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.slice("ticks").unwrap(), Some(json!(2)));
    assert!(!store.has_pending().unwrap());
}

#[test]
fn test_unsubscribe_broadcast_and_observable() {
    let store = built_store();
    let (calls, listener) = call_counter();
    let id = store.subscribe(listener).unwrap();
    assert!(store.unsubscribe(id).unwrap());
    assert!(!store.unsubscribe(id).unwrap());

    let cursor = store.observable("cursor");
    let (observed, listener) = call_counter();
    let id = cursor.subscribe(listener).unwrap();
    assert!(cursor.unsubscribe(id).unwrap());

    store
        .dispatch_with(Action::new("increment"), FlushMode::Immediate)
        .unwrap();
    assert_eq!(count(&calls), 0);
    assert_eq!(count(&observed), 0);
}

struct CountingScheduler {
    scheduled: Arc<AtomicUsize>,
}

impl FlushScheduler for CountingScheduler {
    fn schedule(&self, _store: Store) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_deferred_dispatches_share_one_scheduled_flush() {
    let store = built_store();
    let scheduled = Arc::new(AtomicUsize::new(0));
    store
        .set_scheduler(Arc::new(CountingScheduler {
            scheduled: Arc::clone(&scheduled),
        }))
        .unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    store.dispatch(Action::new("increment")).unwrap();
    assert_eq!(scheduled.load(Ordering::SeqCst), 1);

    store.flush().unwrap();
    store.dispatch(Action::new("increment")).unwrap();
    assert_eq!(scheduled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tokio_flush_delivers_without_manual_flush() {
    let store = built_store();
    store.set_scheduler(Arc::new(TokioFlush)).unwrap();
    let (calls, listener) = call_counter();
    store.subscribe(listener).unwrap();

    store.dispatch(Action::new("increment")).unwrap();
    for _ in 0..10 {
        if count(&calls) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(count(&calls), 1);
}
