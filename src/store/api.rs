//! Public API for the reactive store

pub use crate::store::action::{Action, INIT_ACTION};
pub use crate::store::coordinator::{ObservableState, Store};
pub use crate::store::memo::{MemoId, MemoOptions, Memoized};
pub use crate::store::reducer::{NotificationScope, Reducer, StateContribution};
pub use crate::store::scheduler::{FlushMode, FlushScheduler, ManualFlush, TokioFlush};
