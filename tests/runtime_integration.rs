//! End-to-end runtime behaviour through the public API

mod common;

use common::{documents_module, layered_config, palette_module, storage_module, Keys};
use modhost::{
    Action, ModuleDescriptor, ModuleState, ModulesChanged, Runtime, RuntimeError,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn application() -> (Runtime, Arc<Mutex<Vec<String>>>) {
    let runtime = Runtime::new(layered_config()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    runtime.declare_slot(&Keys::new().commands).unwrap();
    runtime
        .add_modules([
            palette_module(Arc::clone(&seen)).into(),
            documents_module().into(),
            storage_module().into(),
        ])
        .unwrap();
    (runtime, seen)
}

#[test]
fn test_application_boots_in_dependency_order() {
    let (runtime, seen) = application();

    assert_eq!(
        runtime.module_names().unwrap(),
        vec!["storage", "documents", "palette"]
    );
    assert_eq!(*seen.lock().unwrap(), vec!["palette"]);

    let keys = Keys::new();
    let documents = runtime.get_capability(&keys.documents).unwrap();
    let storage = runtime.get_capability(&keys.storage).unwrap();
    assert!(Arc::ptr_eq(&documents.storage, &storage));

    let commands: Vec<String> = runtime
        .get_slot(&keys.commands)
        .unwrap()
        .values()
        .unwrap()
        .iter()
        .map(|command| command.id.clone())
        .collect();
    assert_eq!(commands, vec!["documents.open", "palette.show"]);
}

#[test]
fn test_store_notifies_observers_after_flush() {
    let (runtime, _) = application();
    let store = runtime.store();
    runtime.flush().unwrap();

    let documents = store.observable("documents");
    let updates = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&updates);
    documents
        .subscribe(move || *counter.lock().unwrap() += 1)
        .unwrap();

    store
        .dispatch(Action::new("open").with_payload(json!("notes.md")))
        .unwrap();
    store
        .dispatch(Action::new("open").with_payload(json!("todo.md")))
        .unwrap();
    assert_eq!(*updates.lock().unwrap(), 0);

    runtime.flush().unwrap();
    assert_eq!(*updates.lock().unwrap(), 1);
    assert_eq!(
        documents.current().unwrap(),
        json!({"open_documents": ["notes.md", "todo.md"]})
    );
}

#[test]
fn test_removing_the_foundation_and_restoring_it() {
    let (runtime, _) = application();
    let changes: Arc<Mutex<Vec<ModulesChanged>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    runtime
        .on_modules_changed(move |change| sink.lock().unwrap().push(change.clone()))
        .unwrap();

    runtime.remove_modules(&["storage"]).unwrap();
    assert!(!runtime.has_module("documents"));
    assert!(runtime.is_pending("palette"));
    let commands = runtime.get_slot(&Keys::new().commands).unwrap();
    assert!(commands.values().unwrap().is_empty());
    assert!(runtime.store().slice("open_documents").unwrap().is_none());

    runtime.add_module(storage_module()).unwrap();
    assert_eq!(runtime.module_state("palette"), Some(ModuleState::Extended));
    assert_eq!(commands.values().unwrap().len(), 2);

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].removed, vec!["palette", "documents", "storage"]);
    assert_eq!(changes[1].installed, vec!["storage", "documents", "palette"]);
}

#[test]
fn test_layer_violation_names_both_layers() {
    let runtime = Runtime::new(layered_config()).unwrap();
    let keys = Keys::new();
    let backwards = ModuleDescriptor::builder("cache")
        .layer("infra")
        .depends_on(&keys.documents)
        .build();

    match runtime.add_module(backwards) {
        Err(error @ RuntimeError::LayerViolation { .. }) => {
            let message = error.to_string();
            assert!(message.contains("'infra'"), "{}", message);
            assert!(message.contains("'domain'"), "{}", message);
        }
        other => panic!("expected a layer violation, got {:?}", other),
    }
}

#[test]
fn test_diagnostics_explain_a_stuck_module() {
    let runtime = Runtime::new(layered_config()).unwrap();
    runtime
        .add_modules([documents_module().into(), palette_module(Default::default()).into()])
        .unwrap();

    let missing = runtime.why_unready("documents").unwrap();
    assert_eq!(missing[0].capability, "Storage");
    let missing = runtime.why_unready("palette").unwrap();
    assert_eq!(missing[0].provided_by_pending.as_deref(), Some("documents"));

    assert!(matches!(
        runtime.verify_dependencies(),
        Err(RuntimeError::UnreachableDependencies { .. })
    ));
    let report = runtime.diagnostics().unwrap();
    assert_eq!(report.pending.len(), 2);
}

#[test]
fn test_shutdown_leaves_an_empty_runtime() {
    let (runtime, _) = application();
    runtime.shutdown().unwrap();

    assert!(runtime.module_names().unwrap().is_empty());
    assert_eq!(runtime.store().state().unwrap(), json!({}));
    // only the host's own slot survives
    assert_eq!(runtime.all_slot_keys().unwrap().len(), 1);
}
