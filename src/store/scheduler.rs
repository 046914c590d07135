//! Deferred flush scheduling
//!
//! A dispatch that changes state marks notifications as pending and asks the
//! store's [`FlushScheduler`] for one deferred flush. Further dispatches
//! before that flush runs are folded into it.

use crate::store::coordinator::Store;

/// When a dispatch delivers its notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Leave them to the scheduled flush
    #[default]
    Deferred,
    /// Flush before `dispatch_with` returns
    Immediate,
}

/// Runs a store flush at some later point
///
/// # Example Implementation
///
/// ```rust,no_run
/// use modhost::store::{FlushScheduler, Store};
///
/// struct OnNextTick;
///
/// impl FlushScheduler for OnNextTick {
///     fn schedule(&self, store: Store) {
///         std::thread::spawn(move || {
///             let _ = store.flush();
///         });
///     }
/// }
/// ```
pub trait FlushScheduler: Send + Sync {
    /// Arrange for `store.flush()` to be called; invoked at most once until
    /// that flush starts
    fn schedule(&self, store: Store);
}

/// Never flushes on its own; the host calls [`Store::flush`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualFlush;

impl FlushScheduler for ManualFlush {
    fn schedule(&self, _store: Store) {
        log::trace!("flush pending until the host calls flush()");
    }
}

/// Flushes on the ambient tokio runtime after yielding once
///
/// Outside a tokio runtime nothing is scheduled and the host must flush.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFlush;

impl FlushScheduler for TokioFlush {
    fn schedule(&self, store: Store) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    if let Err(e) = store.flush() {
                        log::warn!("Deferred store flush failed: {}", e);
                    }
                });
            }
            Err(_) => {
                log::debug!("No tokio runtime available; flush left to the host");
            }
        }
    }
}
