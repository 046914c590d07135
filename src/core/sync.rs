//! Lock helpers
//!
//! Every piece of shared runtime state sits behind a `std::sync::Mutex`.
//! A poisoned lock means a module callback panicked while the runtime was
//! mid-update; callers get an error instead of a second panic.

use std::sync::{LockResult, Mutex, MutexGuard};

/// Map a poisoned lock result into an application error
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "Internal synchronisation error (mutex poisoned). A panic occurred while holding a runtime lock: {}",
            poison_err
        ))
    })
}

/// Lock `mutex`, converting poisoning into an application error
pub fn lock_or<'a, T, E>(
    mutex: &'a Mutex<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<MutexGuard<'a, T>, E> {
    handle_mutex_poison(mutex.lock(), error_constructor)
}
