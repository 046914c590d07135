//! Common test utilities for integration tests
//!
//! A small editor-like application: storage at the bottom, documents on top
//! of it, and a command palette the host owns.

#![allow(dead_code)]

use modhost::{
    Action, CapabilityKey, ModuleDescriptor, RuntimeConfig, SlotKey, StateContribution,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub struct Keys {
    pub storage: CapabilityKey<Storage>,
    pub documents: CapabilityKey<Documents>,
    pub commands: SlotKey<Command>,
}

impl Keys {
    /// Fresh key instances, as a separately built bundle would create them
    pub fn new() -> Self {
        Self {
            storage: CapabilityKey::public("Storage").with_layer("infra"),
            documents: CapabilityKey::public("Documents").with_layer("domain"),
            commands: SlotKey::public("Commands"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Storage {
    pub files: Mutex<Vec<String>>,
}

#[derive(Debug)]
pub struct Documents {
    pub storage: Arc<Storage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: String,
}

pub fn layered_config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(
        r#"
        [[layers]]
        name = "architecture"
        levels = [
            { name = "infra", level = 0 },
            { name = "domain", level = 1 },
            { name = "ui", level = 2 },
        ]
        "#,
    )
    .expect("valid config")
}

pub fn storage_module() -> ModuleDescriptor {
    let keys = Keys::new();
    let provided = keys.storage.clone();
    ModuleDescriptor::builder("storage")
        .layer("infra")
        .declares(&keys.storage)
        .on_attach(move |ctx| ctx.provide(&provided, Storage::default()))
        .build()
}

pub fn documents_module() -> ModuleDescriptor {
    let keys = Keys::new();
    let storage = keys.storage.clone();
    let documents = keys.documents.clone();
    let commands = keys.commands.clone();
    ModuleDescriptor::builder("documents")
        .layer("domain")
        .depends_on(&keys.storage)
        .declares(&keys.documents)
        .on_attach(move |ctx| {
            ctx.contribute_state(
                StateContribution::new("open_documents", |state: Option<&Value>, action: &Action| {
                    let mut open = state.cloned().unwrap_or_else(|| json!([]));
                    if action.kind == "open" {
                        if let Some(list) = open.as_array_mut() {
                            list.push(action.payload.clone());
                        }
                    }
                    open
                })
                .observable("documents"),
            )
        })
        .on_extend(move |ctx| {
            let storage = ctx.get_capability(&storage)?;
            ctx.provide(&documents, Documents { storage })?;
            ctx.contribute(
                &commands,
                Command {
                    id: "documents.open".to_string(),
                },
            )
        })
        .build()
}

pub fn palette_module(seen: Arc<Mutex<Vec<String>>>) -> ModuleDescriptor {
    let keys = Keys::new();
    let commands = keys.commands.clone();
    ModuleDescriptor::builder("palette")
        .layer("ui")
        .depends_on(&keys.documents)
        .on_extend(move |ctx| {
            ctx.contribute(
                &commands,
                Command {
                    id: "palette.show".to_string(),
                },
            )?;
            seen.lock().unwrap().push(ctx.name().to_string());
            Ok(())
        })
        .build()
}
