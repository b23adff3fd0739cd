//! Cooperative cancellation for transcript operations.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::Error;

/// Cloneable cancellation handle shared between a transcript operation and its caller.
///
/// The interpreter checks the token between transcript lines, and the embedded shell
/// polls it while waiting on child processes (killing them once the token is set).
/// A cancelled operation returns [`Error::Cancelled`].
///
/// # Examples
///
/// ```
/// use cmdt::CancelToken;
///
/// let token = CancelToken::new();
/// let watchdog = token.clone();
/// // e.g. `std::thread::spawn(move || { /* wait */ watchdog.cancel(); })`
/// watchdog.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks whether the token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
