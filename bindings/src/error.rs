//! Error types for the binding runtime

use thiserror::Error;

/// Result type for binding runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Startup errors. All of them are fatal: the process must not start.
#[derive(Error, Debug)]
pub enum Error {
    /// Two bindings share a name
    #[error("Duplicate binding name: {0}")]
    DuplicateBinding(String),

    /// Required field missing or empty
    #[error("Binding '{binding}' is missing required field '{field}'")]
    MissingField {
        /// Binding name
        binding: String,
        /// Field path
        field: String,
    },

    /// Binding or runtime settings are unusable
    #[error("Invalid binding '{binding}': {reason}")]
    InvalidBinding {
        /// Binding name (or `runtime`)
        binding: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Adapter could not be constructed from its configuration
    #[error("Adapter error: {0}")]
    Adapter(#[from] adapters::Error),
}

impl Error {
    pub(crate) fn invalid(binding: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidBinding {
            binding: binding.into(),
            reason: reason.into(),
        }
    }
}
