//! Panic containment for user callbacks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use cadence_types::CommandError;

/// Run `f`, turning a panic into [`CommandError::Panicked`].
///
/// The closure is asserted unwind-safe: after a panic the only state the
/// scheduler relies on is its own bookkeeping, which is never borrowed while
/// user code runs.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, CommandError>) -> Result<T, CommandError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CommandError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
