//! Context access rules, slots and store through the runtime

use super::utils::{provider, runtime, runtime_with, Journal};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::module::api::{ModuleContext, ModuleDescriptor};
use crate::slots::api::{CapabilityKey, Contribution, SlotKey};
use crate::store::api::{Action, FlushMode, StateContribution};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn counter(slice: &str) -> StateContribution {
    StateContribution::new(slice, |state: Option<&Value>, action: &Action| {
        let current = state.and_then(Value::as_i64).unwrap_or(0);
        match action.kind.as_str() {
            "increment" => json!(current + 1),
            _ => json!(current),
        }
    })
}

/// Context captured from a module's extend phase
fn captured(name: &str) -> (ModuleDescriptor, Arc<Mutex<Option<ModuleContext>>>) {
    let slot = Arc::new(Mutex::new(None));
    let keep = Arc::clone(&slot);
    let module = ModuleDescriptor::builder(name)
        .on_extend(move |ctx| {
            *keep.lock().unwrap() = Some(ctx.clone());
            Ok(())
        })
        .build();
    (module, slot)
}

#[test]
fn test_capability_reads_refused_during_attach() {
    let runtime = runtime();
    let journal = Journal::new();
    let clock: CapabilityKey<u32> = CapabilityKey::new("Clock");
    runtime.add_module(provider("clock", &clock, None, &journal)).unwrap();

    let refused = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&refused);
    let key = clock.clone();
    runtime
        .add_module(
            ModuleDescriptor::builder("reader")
                .depends_on(&clock)
                .on_attach(move |ctx| {
                    let result = ctx.get_capability(&key);
                    seen.store(
                        matches!(result, Err(RuntimeError::CapabilitiesNotReady { .. })),
                        Ordering::SeqCst,
                    );
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    assert!(refused.load(Ordering::SeqCst));
}

#[test]
fn test_undeclared_dependency_read_refused() {
    let journal = Journal::new();
    let clock: CapabilityKey<u32> = CapabilityKey::new("Clock");

    let check = |config: RuntimeConfig| {
        let runtime = runtime_with(config);
        runtime.add_module(provider("clock", &clock, None, &journal)).unwrap();
        let (module, ctx) = captured("sneaky");
        runtime.add_module(module).unwrap();
        let ctx = ctx.lock().unwrap().clone().unwrap();
        ctx.get_capability(&clock)
    };

    assert!(matches!(
        check(RuntimeConfig::default()),
        Err(RuntimeError::UndeclaredDependency { .. })
    ));
    assert_eq!(
        *check(RuntimeConfig::default().with_dependency_enforcement(false)).unwrap(),
        1
    );
}

#[test]
fn test_providing_undeclared_capability_refused() {
    let runtime = runtime();
    let clock: CapabilityKey<u32> = CapabilityKey::new("Clock");
    let result = runtime.add_module(
        ModuleDescriptor::builder("liar")
            .on_attach(move |ctx| ctx.provide(&clock, 1))
            .build(),
    );
    match result {
        Err(RuntimeError::PhaseFailed { cause, .. }) => {
            assert!(cause.contains("Clock"), "{}", cause)
        }
        other => panic!("expected a phase failure, got {:?}", other),
    }
}

#[test]
fn test_second_provider_refused() {
    let runtime = runtime();
    let journal = Journal::new();
    let clock: CapabilityKey<u32> = CapabilityKey::public("Clock");
    runtime.add_module(provider("first", &clock, None, &journal)).unwrap();

    let second = runtime.add_module(provider("second", &clock, None, &journal));
    assert!(matches!(second, Err(RuntimeError::PhaseFailed { module, .. }) if module == "second"));
    assert_eq!(runtime.get_capability(&clock).map(|v| *v), Ok(1));
}

#[test]
fn test_own_key_resolution() {
    let runtime = runtime();
    let journal = Journal::new();

    // two bundles building their own copy of one public key
    let provided: CapabilityKey<u32> = CapabilityKey::public("Clock");
    let requested: CapabilityKey<u32> = CapabilityKey::public("Clock");
    runtime.add_module(provider("clock", &provided, None, &journal)).unwrap();
    assert_eq!(*runtime.get_capability(&requested).unwrap(), 1);

    // private keys match only themselves
    let private: CapabilityKey<u32> = CapabilityKey::new("Timer");
    let copy: CapabilityKey<u32> = CapabilityKey::new("Timer");
    runtime.add_module(provider("timer", &private, None, &journal)).unwrap();
    assert!(runtime.has_capability(&private));
    assert!(!runtime.has_capability(&copy));
    assert!(matches!(
        runtime.get_capability(&copy),
        Err(RuntimeError::CapabilityNotFound { .. })
    ));
}

#[test]
fn test_slot_visibility() {
    let runtime = runtime();
    let panels: SlotKey<&'static str> = SlotKey::new("Panels");
    let slot = runtime.declare_slot(&panels).unwrap();

    slot.contribute("host", "files").unwrap();
    slot.contribute_with("host", "debug", Contribution::new().visible_when(|| false))
        .unwrap();

    let visible: Vec<&str> = slot.values().unwrap().iter().map(|v| **v).collect();
    assert_eq!(visible, vec!["files"]);
    assert_eq!(slot.items(true).unwrap().len(), 2);
}

#[test]
fn test_private_slot_ownership() {
    let runtime = runtime();
    let commands: SlotKey<String> = SlotKey::new("Commands");
    let declared = commands.clone();
    runtime
        .add_module(
            ModuleDescriptor::builder("palette")
                .on_attach(move |ctx| ctx.declare_slot(&declared).map(|_| ()))
                .build(),
        )
        .unwrap();

    let (module, ctx) = captured("plugin");
    runtime.add_module(module).unwrap();
    let plugin = ctx.lock().unwrap().clone().unwrap();

    match plugin.get_slot(&commands) {
        Err(RuntimeError::OwnershipViolation {
            requester, owner, ..
        }) => {
            assert_eq!(requester, "plugin");
            assert_eq!(owner, "palette");
        }
        other => panic!("expected an ownership violation, got {:?}", other.map(|_| ())),
    }
    // contributing stays open to everyone
    plugin.contribute(&commands, "format".to_string()).unwrap();
    let slot = runtime.get_slot(&commands).unwrap();
    assert_eq!(slot.single_item().unwrap().unwrap().owner(), "plugin");
}

#[test]
fn test_duplicate_public_slot_rejected() {
    let runtime = runtime();
    let first: SlotKey<u32> = SlotKey::public("Status");
    let second: SlotKey<u32> = SlotKey::public("Status");
    runtime.declare_slot(&first).unwrap();

    let result = runtime.add_module(
        ModuleDescriptor::builder("status")
            .on_attach(move |ctx| ctx.declare_slot(&second).map(|_| ()))
            .build(),
    );
    match result {
        Err(RuntimeError::PhaseFailed { cause, .. }) => {
            assert!(cause.contains("Status"), "{}", cause)
        }
        other => panic!("expected a phase failure, got {:?}", other),
    }
}

#[test]
fn test_slot_cannot_shadow_capability_name() {
    let runtime = runtime();
    let journal = Journal::new();
    let clock: CapabilityKey<u32> = CapabilityKey::new("Clock");
    runtime.add_module(provider("clock", &clock, None, &journal)).unwrap();

    let slot: SlotKey<String> = SlotKey::new("Clock");
    assert!(matches!(
        runtime.declare_slot(&slot),
        Err(RuntimeError::DuplicateSlot { owner, .. }) if owner == "clock"
    ));
    assert_eq!(runtime.all_slot_keys().unwrap().len(), 1);
}

#[test]
fn test_store_reads_after_build() {
    let runtime = runtime();
    let store_read_in_attach = Arc::new(AtomicBool::new(true));
    let seen = Arc::clone(&store_read_in_attach);

    runtime
        .add_module(
            ModuleDescriptor::builder("counter")
                .on_attach(move |ctx| {
                    seen.store(ctx.state().is_ok(), Ordering::SeqCst);
                    ctx.contribute_state(counter("count"))
                })
                .on_extend(|ctx| {
                    assert_eq!(ctx.slice("count")?, Some(json!(0)));
                    ctx.dispatch_with(Action::new("increment"), FlushMode::Immediate)
                })
                .build(),
        )
        .unwrap();

    assert!(!store_read_in_attach.load(Ordering::SeqCst));
    assert_eq!(runtime.store().state().unwrap(), json!({"count": 1}));
}

#[test]
fn test_scoped_dispatch_reaches_own_reducers() {
    let runtime = runtime_with(RuntimeConfig::default().with_scoped_reducers(true));
    let (ours, ours_ctx) = captured("ours");
    runtime.add_module(ours).unwrap();
    let ours_ctx = ours_ctx.lock().unwrap().clone().unwrap();

    let theirs = ModuleDescriptor::builder("theirs")
        .on_attach(|ctx| ctx.contribute_state(counter("theirs")))
        .build();
    runtime.add_module(theirs).unwrap();
    runtime
        .add_module(
            ModuleDescriptor::builder("mine")
                .on_attach(|ctx| ctx.contribute_state(counter("mine")))
                .build(),
        )
        .unwrap();

    // scoped to "ours", which owns no slice: nobody else reacts
    ours_ctx.dispatch(Action::new("increment")).unwrap();
    assert_eq!(runtime.store().state().unwrap(), json!({"theirs": 0, "mine": 0}));

    ours_ctx.dispatch_global(Action::new("increment")).unwrap();
    assert_eq!(runtime.store().state().unwrap(), json!({"theirs": 1, "mine": 1}));
}

#[test]
fn test_memoized_results_refresh_after_flush() {
    let runtime = runtime();
    runtime
        .add_module(
            ModuleDescriptor::builder("counter")
                .on_attach(|ctx| ctx.contribute_state(counter("count")))
                .build(),
        )
        .unwrap();
    runtime.flush().unwrap();

    let store = runtime.store();
    let reader = store.clone();
    let doubled = store
        .memoize(
            |name: &String| name.clone(),
            move |name: &String| {
                let value = reader.slice(name).ok().flatten();
                value.and_then(|v| v.as_i64()).unwrap_or(0) * 2
            },
        )
        .unwrap();

    let key = "count".to_string();
    let first = doubled.call(&key).unwrap();
    let again = doubled.call(&key).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    store.dispatch(Action::new("increment")).unwrap();
    runtime.flush().unwrap();

    let after = doubled.call(&key).unwrap();
    assert!(!Arc::ptr_eq(&first, &after));
    assert_eq!(*after, 2);
}

#[test]
fn test_memoized_functions_unregister_on_detach() {
    let runtime = runtime();
    let holder = Arc::new(Mutex::new(None));
    let keep = Arc::clone(&holder);
    runtime
        .add_module(
            ModuleDescriptor::builder("cache")
                .on_extend(move |ctx| {
                    let memo = ctx.memoize(|n: &u32| n.to_string(), |n: &u32| n + 1)?;
                    *keep.lock().unwrap() = Some(memo);
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    assert_eq!(runtime.store().memo_count().unwrap(), 1);

    runtime.remove_modules(&["cache"]).unwrap();
    assert_eq!(runtime.store().memo_count().unwrap(), 0);
    drop(holder);
}

#[test]
fn test_late_init_reads_as_incomplete() {
    let runtime = runtime();
    let (module, ctx) = captured("late");
    runtime.add_module(module).unwrap();
    let ctx = ctx.lock().unwrap().clone().unwrap();
    assert!(ctx.is_init_complete());

    let inside = ctx.late_init(|ctx| Ok(ctx.is_init_complete())).unwrap();
    assert!(!inside);
    assert!(ctx.is_init_complete());
}

#[test]
fn test_context_outlives_runtime() {
    let (module, ctx) = captured("orphan");
    {
        let runtime = runtime();
        runtime.add_module(module).unwrap();
    }
    let ctx = ctx.lock().unwrap().clone().unwrap();
    assert!(matches!(
        ctx.dispatch(Action::new("increment")),
        Err(RuntimeError::RuntimeDropped)
    ));
    assert!(!ctx.has_module("orphan"));
}
