//! Error types for spellcast operations.
//!
//! Uses thiserror for derive macros and carries the underlying OS error so
//! callers can distinguish "not found" from "permission denied" and friends.

use std::io;
use thiserror::Error;

/// Main error type for spellcast operations.
///
/// Launch failures cover everything that can go wrong before a child is
/// running, including pipe and null-device creation. I/O on the child's
/// stream handles is reported through their `std::io` trait impls instead.
#[derive(Error, Debug)]
pub enum SpellError {
    /// The target program could not be started.
    #[error("failed to launch '{program}': {source}")]
    Launch { program: String, source: io::Error },

    /// Waiting on a launched child failed.
    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    /// Draining a child's buffered output failed.
    #[error("failed to collect child output: {0}")]
    Collect(#[source] io::Error),

    /// Delivering a termination request to a launched child failed.
    #[error("failed to kill child: {0}")]
    Kill(#[source] io::Error),
}

impl SpellError {
    /// Returns the kind of the underlying OS error.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            SpellError::Launch { source, .. } => source.kind(),
            SpellError::Wait(source) => source.kind(),
            SpellError::Collect(source) => source.kind(),
            SpellError::Kill(source) => source.kind(),
        }
    }
}

/// Result type alias for spellcast operations.
pub type Result<T> = std::result::Result<T, SpellError>;
