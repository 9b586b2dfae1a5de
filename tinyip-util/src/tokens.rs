//! Infrastructure for linear types, called "tokens" throughout the stack.

use core::mem;

/// Marks a value as linear: it must be handed back to its originator rather
/// than dropped.
///
/// A determined user can still leak a token and thereby defeat the drop
/// guard. That is acceptable. The guard exists to catch accidental drops in
/// practice, not to be literally airtight.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TokenGuard;

impl TokenGuard {
    /// Consumes the token without triggering the drop panic.
    pub(crate) const fn consume(self) {
        mem::forget(self);
    }
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        panic!("Tokens must be returned to their originator, not dropped.")
    }
}
