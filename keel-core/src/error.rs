//! Error types for Keel

use thiserror::Error;

/// Keel error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operator-supplied resource string could not be parsed
    #[error("Failed to parse resources '{input}': {message}")]
    ConfigParse {
        /// The offending input
        input: String,
        /// What was wrong with it
        message: String,
    },

    /// Additive merge hit a (name, role) key present on both sides
    #[error("Duplicate resource '{name}' for role '{role}'")]
    DuplicateResource {
        /// Resource name
        name: String,
        /// Role label
        role: String,
    },

    /// `CGroup` operation failed
    #[error("CGroup error: {message}")]
    CGroup {
        /// Error message
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Isolation backend asked about a task it is not tracking
    #[error("Unknown or killed task: {task}")]
    UnknownTask {
        /// Task identifier
        task: String,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::ConfigParse`] for `input`
    pub fn parse(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigParse {
            input: input.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, Error>;
