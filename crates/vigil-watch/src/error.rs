//! Error types for watchers.

use vigil_core::error::VigilError;

/// Errors raised while polling a source or persisting what it produced.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The source could not be reached this cycle; the next cycle retries.
    #[error("Poll failed: {0}")]
    Poll(String),
    /// One candidate could not be turned into a record; it is skipped.
    #[error("Malformed input: {0}")]
    Malformed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] VigilError),
}

impl WatchError {
    /// Whether the harness must halt rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::Storage(e) if e.is_storage_failure())
    }
}
