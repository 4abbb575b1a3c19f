//! Error types for the engine contract.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Faults raised by an engine behind the [`crate::EngineCore`] interface.
///
/// The shim treats every variant the same way: it captures the rendered
/// message at the operation boundary and never lets the fault escape to the
/// host as a panic.
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O error from the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Statement could not be parsed.
    #[error("syntax error: {message}")]
    Syntax {
        /// What the parser choked on.
        message: String,
    },

    /// A referenced library, database, or table does not exist.
    #[error("undefined object: {message}")]
    UndefinedObject {
        /// Description of the missing object.
        message: String,
    },

    /// A referenced function does not exist.
    #[error("undefined function: {message}")]
    UndefinedFunction {
        /// Description of the missing function.
        message: String,
    },

    /// An object with the same name already exists.
    #[error("duplicate object: {message}")]
    DuplicateObject {
        /// Description of the clash.
        message: String,
    },

    /// Catalog tables may only be modified by a privileged session.
    #[error("permission denied: {message}")]
    CatalogEdit {
        /// Description of the rejected catalog edit.
        message: String,
    },

    /// Operation called in the wrong engine state (no transaction, no
    /// snapshot, not connected, not started).
    #[error("invalid engine state: {message}")]
    InvalidState {
        /// Description of the state violation.
        message: String,
    },

    /// On-disk table data could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Underlying codec failure.
        message: String,
    },

    /// Statement execution failed.
    #[error("execution failed: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates an undefined-object error.
    pub fn undefined_object(message: impl Into<String>) -> Self {
        Self::UndefinedObject {
            message: message.into(),
        }
    }

    /// Creates an undefined-function error.
    pub fn undefined_function(message: impl Into<String>) -> Self {
        Self::UndefinedFunction {
            message: message.into(),
        }
    }

    /// Creates a duplicate-object error.
    pub fn duplicate_object(message: impl Into<String>) -> Self {
        Self::DuplicateObject {
            message: message.into(),
        }
    }

    /// Creates a catalog-edit error.
    pub fn catalog_edit(message: impl Into<String>) -> Self {
        Self::CatalogEdit {
            message: message.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}
