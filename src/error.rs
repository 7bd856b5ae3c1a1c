//! Error taxonomy of the harness.
//!
//! Nothing here is ever retried internally. Configuration errors are fatal at setup time, storage
//! errors are fatal to the current invocation, and validation errors are surfaced after a run
//! completes without affecting measured timing. All of them propagate to the immediate caller
//! with enough context to diagnose without re-running.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid size/width combination or otherwise malformed benchmark input.
    #[error("configuration: {0}")]
    Config(String),

    /// The configuration text could not be parsed at all.
    #[error("configuration: {0}")]
    Parse(#[from] figment::Error),

    /// The engine failed to open a session.
    #[error("storage open: {0}")]
    Open(String),

    /// The engine failed a read.
    #[error("storage read: {0}")]
    Read(String),

    /// The engine failed a write.
    #[error("storage write: {0}")]
    Write(String),

    /// The engine failed to close a session.
    #[error("storage close: {0}")]
    Close(String),

    /// A worker thread died without reporting a storage error.
    #[error("worker: {0}")]
    Worker(String),

    /// A post-run invariant did not hold.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A failed expected-vs-actual check, carrying a human-readable message that names the subject
/// and both values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("validation: {0}")]
pub struct ValidationError(pub String);
