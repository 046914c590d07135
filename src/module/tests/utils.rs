//! Shared helpers for runtime tests

use crate::config::RuntimeConfig;
use crate::module::api::{ModuleDescriptor, ModuleDescriptorBuilder, Runtime};
use crate::slots::api::CapabilityKey;
use std::sync::{Arc, Mutex};

/// Ordered record of lifecycle events, e.g. `"a:attach"`
#[derive(Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default()).unwrap()
}

pub fn runtime_with(config: RuntimeConfig) -> Runtime {
    Runtime::new(config).unwrap()
}

/// Builder with every phase recorded in `journal`
pub fn recorded(name: &str, journal: &Journal) -> ModuleDescriptorBuilder {
    let attach = journal.clone();
    let extend = journal.clone();
    let detach = journal.clone();
    let (a, e, d) = (
        format!("{}:attach", name),
        format!("{}:extend", name),
        format!("{}:detach", name),
    );
    ModuleDescriptor::builder(name)
        .on_attach(move |_| {
            attach.record(a.clone());
            Ok(())
        })
        .on_extend(move |_| {
            extend.record(e.clone());
            Ok(())
        })
        .on_detach(move |_| {
            detach.record(d.clone());
            Ok(())
        })
}

/// Module that provides `provides` during attach, optionally depending on `needs`
pub fn provider(
    name: &str,
    provides: &CapabilityKey<u32>,
    needs: Option<&CapabilityKey<u32>>,
    journal: &Journal,
) -> ModuleDescriptor {
    let key = provides.clone();
    let journal = journal.clone();
    let event = format!("{}:attach", name);
    let mut builder = ModuleDescriptor::builder(name).declares(provides);
    if let Some(needs) = needs {
        builder = builder.depends_on(needs);
    }
    let detach_journal = journal.clone();
    let detach_event = format!("{}:detach", name);
    builder
        .on_attach(move |ctx| {
            journal.record(event.clone());
            ctx.provide(&key, 1)
        })
        .on_detach(move |_| {
            detach_journal.record(detach_event.clone());
            Ok(())
        })
        .build()
}
