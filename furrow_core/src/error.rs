//! Unified error handling for FURROW
//!
//! One error type for the whole runtime. Faults that occur inside a
//! module boundary (handler panics, lifecycle failures) are contained by
//! the supervisor and surface as health downgrades rather than as these
//! errors; `FurrowError` is what the *caller* of a runtime operation
//! gets back synchronously.

use thiserror::Error;

/// Main error type for FURROW operations
#[derive(Debug, Error)]
pub enum FurrowError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// Module-related errors
    #[error("Module '{module}' error: {message}")]
    Module { module: String, message: String },

    /// Scheduling errors
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// A lifecycle call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Already exists errors (for load/registration operations)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A module declares a dependency that is not registered
    #[error("Module '{module}' depends on '{dependency}', which is not registered")]
    MissingDependency { module: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("Dependency cycle among modules: {0:?}")]
    DependencyCycle(Vec<String>),

    /// Unload refused: other loaded modules still depend on the target
    #[error("Cannot unload '{module}': still required by {dependents:?}")]
    DependentsLoaded {
        module: String,
        dependents: Vec<String>,
    },

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors with source location for debugging.
    /// Use the `furrow_internal!()` macro to create these — it captures file/line automatically.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use furrow_core::furrow_internal;
/// return Err(furrow_internal!("Unexpected state: {:?}", state));
/// ```
#[macro_export]
macro_rules! furrow_internal {
    ($($arg:tt)*) => {
        $crate::error::FurrowError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using FurrowError
pub type FurrowResult<T> = std::result::Result<T, FurrowError>;

// ============================================
// From implementations for common error types
// ============================================

impl From<serde_json::Error> for FurrowError {
    fn from(err: serde_json::Error) -> Self {
        FurrowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FurrowError {
    fn from(err: anyhow::Error) -> Self {
        FurrowError::Internal {
            message: err.to_string(),
            file: "unknown",
            line: 0,
        }
    }
}

// NOTE: From<String> and From<&str> intentionally absent.
// Use the specific constructors instead so errors stay typed.

// Helper methods
impl FurrowError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        FurrowError::Config(msg.into())
    }

    /// Create a bus error
    pub fn bus<S: Into<String>>(msg: S) -> Self {
        FurrowError::Bus(msg.into())
    }

    /// Create a module error with module name and message
    pub fn module<S: Into<String>, T: Into<String>>(module: S, message: T) -> Self {
        FurrowError::Module {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create a scheduling error
    pub fn scheduling<S: Into<String>>(msg: S) -> Self {
        FurrowError::Scheduling(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        FurrowError::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        FurrowError::InvalidInput(msg.into())
    }

    /// Create an internal error (without file/line — prefer furrow_internal! macro)
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        FurrowError::Internal {
            message: msg.into(),
            file: "unknown",
            line: 0,
        }
    }
}
