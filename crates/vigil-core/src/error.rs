use thiserror::Error;

/// Top-level error type for the Vigil system.
///
/// Subsystem crates define their own error types and wrap this one, so
/// that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Duplicate fingerprint: {0}")]
    DuplicateFingerprint(String),

    #[error("Record {id} not found in {state}")]
    NotFound { id: String, state: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl VigilError {
    /// Whether this error means the durable store itself is unusable.
    ///
    /// Such failures are not isolated per record: callers halt instead of
    /// continuing in a degraded mode.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            VigilError::Storage(_) | VigilError::Io(_) | VigilError::Ledger(_)
        )
    }
}

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VigilError {
    fn from(err: toml::ser::Error) -> Self {
        VigilError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;
