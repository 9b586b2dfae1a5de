//! Error kinds surfaced by the dispatch core.
//!
//! All failures are local to the frame in flight. None of them corrupts
//! another frame's progress or terminates a scheduler loop.

/// The ways a single frame's processing can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Buffer pool exhausted while allocating or copying. Fatal to the frame
    /// in flight only, never to the stack.
    NoMemory,
    /// Structurally invalid frame or device state. The frame is discarded.
    Malformed,
    /// Unrecognized protocol tag. The frame is discarded and the failure
    /// reported.
    Unsupported,
    /// Link-address resolution exhausted its retries. The frame is discarded
    /// and the sender path informed.
    Unreachable,
    /// Soft backpressure from a bounded queue. The caller discards the
    /// rejected frame; nothing cascades.
    QueueFull,
    /// No socket is bound to the destination port. Reported to the caller,
    /// not a driver-level fault.
    NoListener,
}

/// A type alias for `Result<T, tinyip::Error>`.
pub type Result<T> = core::result::Result<T, Error>;
