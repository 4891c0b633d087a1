//! Error types for adapter operations.

use rowsync_protocol::ErrorKind;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors that can occur during adapter operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// General backend failure. Not retryable.
    #[error("backend error: {0}")]
    Backend(String),

    /// The adapter could not be set up.
    #[error("adapter instantiation failed: {0}")]
    Instantiation(String),

    /// The backend reported a serialization failure.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// A concurrent insert collided on a key.
    #[error("unique constraint violated: {0}")]
    UniqueConstraint(String),

    /// A schema could not be expressed by the backend.
    #[error("schema conversion failed: {0}")]
    SchemaConversion(String),

    /// A mutation was attempted outside a transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// `begin` was called while a transaction was open.
    #[error("transaction already in progress")]
    TransactionActive,

    /// The table is not known to the backend.
    #[error("unknown table: {0}")]
    UnknownTable(String),
}

impl AdapterError {
    /// Returns true if the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::TransactionAborted(_) | AdapterError::UniqueConstraint(_)
        )
    }

    /// Maps this error onto the shared error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Instantiation(_) => ErrorKind::AdapterInstantiation,
            AdapterError::TransactionAborted(_) => ErrorKind::TransactionAborted,
            AdapterError::UniqueConstraint(_) => ErrorKind::UniqueConstraint,
            AdapterError::SchemaConversion(_) => ErrorKind::SchemaConversion,
            AdapterError::Backend(_)
            | AdapterError::NoTransaction
            | AdapterError::TransactionActive
            | AdapterError::UnknownTable(_) => ErrorKind::Adapter,
        }
    }
}

impl From<rusqlite::Error> for AdapterError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    AdapterError::TransactionAborted(err.to_string())
                }
                rusqlite::ErrorCode::ConstraintViolation
                    if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                        || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    AdapterError::UniqueConstraint(err.to_string())
                }
                _ => AdapterError::Backend(err.to_string()),
            },
            _ => AdapterError::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable() {
        assert!(AdapterError::TransactionAborted("x".into()).is_retryable());
        assert!(AdapterError::UniqueConstraint("x".into()).is_retryable());
        assert!(!AdapterError::Backend("x".into()).is_retryable());
        assert!(!AdapterError::NoTransaction.is_retryable());
    }

    #[test]
    fn kinds() {
        assert_eq!(
            AdapterError::Instantiation("x".into()).kind(),
            ErrorKind::AdapterInstantiation
        );
        assert_eq!(AdapterError::NoTransaction.kind(), ErrorKind::Adapter);
    }

    #[test]
    fn busy_maps_to_aborted() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(
            AdapterError::from(err),
            AdapterError::TransactionAborted(_)
        ));
    }

    #[test]
    fn unique_maps_to_constraint() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        assert!(matches!(
            AdapterError::from(err),
            AdapterError::UniqueConstraint(_)
        ));
    }
}
