//! Error types for the shim surface.

use emberdb_engine::EngineError;
use std::io;
use thiserror::Error;

/// Result type for shim operations.
pub type ShimResult<T> = Result<T, ShimError>;

/// Errors surfaced by [`crate::Session`] operations.
///
/// Usage errors (wrong state, bad arguments) are detected before the engine
/// is touched and carry no engine state. Engine faults during `execute` do
/// not appear here at all: they come back as a negative-status
/// [`crate::QueryResult`] with the fault text in the last-error slot.
#[derive(Debug, Error)]
pub enum ShimError {
    /// Operation requires an initialized session.
    #[error("session is not initialized")]
    NotInitialized,

    /// Operation requires an uninitialized session.
    #[error("session is already initialized")]
    AlreadyInitialized,

    /// Another session is live in this process.
    #[error("another session is already live in this process")]
    SessionActive,

    /// `begin` while a transaction is already open.
    #[error("a transaction is already in progress")]
    AlreadyInTransaction,

    /// `commit`/`rollback` with no open transaction.
    #[error("no transaction is in progress")]
    NotInTransaction,

    /// An argument failed validation before reaching the engine.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// `execute` was handed empty statement text.
    #[error("empty statement text")]
    EmptyStatement,

    /// Configuration change attempted after `initialize`.
    #[error("pre-init configuration cannot change once initialized")]
    ConfigAfterInit,

    /// Engine fault outside the `execute` path (begin/commit/rollback,
    /// listen/notify, notification pumping).
    #[error("engine fault: {source}")]
    Engine {
        /// The underlying engine fault.
        #[from]
        source: EngineError,
    },

    /// Engine bring-up failed; the session is not ready.
    #[error("startup failed: {message}")]
    Startup {
        /// The captured bring-up fault text.
        message: String,
    },

    /// Cluster bootstrap (`init_fresh`) failed partway.
    #[error("bootstrap failed: {message}")]
    Bootstrap {
        /// The captured bootstrap fault text.
        message: String,
    },

    /// I/O error from the shim's own filesystem work.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ShimError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a startup error.
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Creates a bootstrap error.
    pub fn bootstrap(message: impl Into<String>) -> Self {
        Self::Bootstrap {
            message: message.into(),
        }
    }
}
