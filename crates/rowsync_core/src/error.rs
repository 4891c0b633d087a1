//! Error types for the synchronization core.

use rowsync_protocol::{ErrorKind, ProtocolError, Revision};
use rowsync_storage::AdapterError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Adapter failure.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The submitting party's basis is older than a table's revision.
    #[error("stale basis revision {basis}: table {table} is at revision {current}")]
    Stale {
        /// Table that moved on.
        table: String,
        /// Revision the submitter reconciled against.
        basis: Revision,
        /// Current revision of the table.
        current: Revision,
    },

    /// Invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A synchronization context could not be built.
    #[error("cannot create sync context: {0}")]
    ContextCreation(String),

    /// A change that the receiving party must not accept.
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// Wire payload problem.
    #[error("serialization error: {0}")]
    Serialization(#[from] ProtocolError),
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true if a fresh attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Adapter(e) => e.is_retryable(),
            CoreError::Stale { .. } => true,
            _ => false,
        }
    }

    /// Returns true for staleness.
    pub fn is_stale(&self) -> bool {
        matches!(self, CoreError::Stale { .. })
    }

    /// Maps this error onto the shared error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Adapter(e) => e.kind(),
            CoreError::Stale { .. } => ErrorKind::Staleness,
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::ContextCreation(_) => ErrorKind::ContextCreation,
            CoreError::InvalidChange(_) => ErrorKind::InvalidRequest,
            CoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_is_retryable() {
        let err = CoreError::Stale {
            table: "t".into(),
            basis: 1,
            current: 2,
        };
        assert!(err.is_retryable());
        assert!(err.is_stale());
        assert_eq!(err.kind(), ErrorKind::Staleness);
    }

    #[test]
    fn adapter_kind_passes_through() {
        let err = CoreError::from(AdapterError::UniqueConstraint("k".into()));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::UniqueConstraint);
        assert!(!CoreError::config("x").is_retryable());
    }
}
