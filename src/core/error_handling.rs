//! Contextual error reporting
//!
//! Errors raised by the runtime fall into two groups: misuse a module author
//! can fix from the message alone, and failures whose message is only useful
//! next to the operation that triggered them. [`log_error_with_context`]
//! logs each group at the right level of detail.

/// Errors that know whether their message is directly actionable
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some`; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    /// True when the message alone tells the developer what to fix
    /// (duplicate names, layer violations, ownership violations).
    fn is_user_actionable(&self) -> bool;

    /// Actionable message, if any
    fn user_message(&self) -> Option<String>;
}

/// Log an error once at `error` level, with full detail at `debug`
pub fn log_error_with_context<E: ContextualError + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => {
            log::error!("{}: {}", operation_context, user_msg);
        }
        _ => {
            log::error!("{} failed", operation_context);
        }
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
