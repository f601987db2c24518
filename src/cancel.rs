//! Cooperative cancellation. The engine polls before each encode pass and on every
//! line of encoder output; nothing is pushed into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Anything the engine can poll for a cancellation request.
pub trait CancelSignal {
    fn is_cancelled(&self) -> bool;
}

impl<F> CancelSignal for F
where
    F: Fn() -> bool,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// Shared cancellation flag. Clones observe the same state, so one clone can be
/// handed to the worker while the caller keeps another to trip it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl CancelSignal for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Never cancels.
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}
