//! Crate-level error type.
//!
//! Processor errors never reach here — per the worker's contract they are
//! caught, logged, and discarded at the point they occur (see
//! [`crate::worker`]). This type only covers failures the Acceptor and
//! Reactor themselves cannot recover from.

use std::io;
use thiserror::Error;

/// Errors surfaced by [`crate::server::Server`] and [`crate::reactor::Reactor`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind, accept, or registration failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for fallible core operations.
pub type Result<T> = std::result::Result<T, ServerError>;
