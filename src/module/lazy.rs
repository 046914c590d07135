//! Lazy modules
//!
//! A lazy module is registered by name with a loader and materialised only
//! when the host asks for it. Concurrent requests for the same module share
//! one in-flight load: the loader runs once and every waiter gets its result.
//! A failed load leaves the registration in place so a later request retries.

use crate::error::{RuntimeError, RuntimeResult};
use crate::module::traits::Module;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Produces a module on demand
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self) -> RuntimeResult<Arc<dyn Module>>;
}

struct FnLoader<F> {
    factory: F,
}

#[async_trait]
impl<F, Fut> ModuleLoader for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = RuntimeResult<Arc<dyn Module>>> + Send + 'static,
{
    async fn load(&self) -> RuntimeResult<Arc<dyn Module>> {
        (self.factory)().await
    }
}

/// Name plus loader
#[derive(Clone)]
pub struct LazyModule {
    name: String,
    loader: Arc<dyn ModuleLoader>,
}

impl LazyModule {
    pub fn new(name: impl Into<String>, loader: impl ModuleLoader + 'static) -> Self {
        Self {
            name: name.into(),
            loader: Arc::new(loader),
        }
    }

    /// Lazy module backed by an async factory function
    pub fn from_fn<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuntimeResult<Arc<dyn Module>>> + Send + 'static,
    {
        Self::new(name, FnLoader { factory })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a load whose result can be awaited by any number of callers
    pub(crate) fn start(&self) -> SharedLoad {
        let loader = Arc::clone(&self.loader);
        let name = self.name.clone();
        async move {
            log::debug!("loading lazy module '{}'", name);
            let module = loader.load().await.map_err(|e| RuntimeError::LazyLoadFailed {
                name: name.clone(),
                cause: e.to_string(),
            })?;
            if module.name() != name {
                return Err(RuntimeError::LazyLoadFailed {
                    cause: format!("loader produced module '{}'", module.name()),
                    name,
                });
            }
            Ok(module)
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for LazyModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModule").field("name", &self.name).finish()
    }
}

pub(crate) type SharedLoad = Shared<BoxFuture<'static, RuntimeResult<Arc<dyn Module>>>>;
