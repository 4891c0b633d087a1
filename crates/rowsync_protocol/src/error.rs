//! Error types shared across the wire boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not valid JSON for the expected type.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload decoded but violates a model invariant.
    #[error("incompatible payload: {0}")]
    Incompatible(String),
}

impl ProtocolError {
    /// Creates an incompatible-payload error.
    pub fn incompatible(message: impl Into<String>) -> Self {
        Self::Incompatible(message.into())
    }

    /// Both variants are reported as [`ErrorKind::Serialization`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Serialization
    }
}

/// The closed set of error kinds reported to users and carried in
/// wire error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// General backend failure.
    Adapter,
    /// The adapter could not be set up.
    AdapterInstantiation,
    /// The backend reported a serialization failure.
    TransactionAborted,
    /// A concurrent insert collided on a key.
    UniqueConstraint,
    /// The submitting party's basis revision is out of date.
    Staleness,
    /// Malformed or incompatible wire payload.
    Serialization,
    /// Schema could not be converted for the backend.
    SchemaConversion,
    /// Invalid configuration.
    Configuration,
    /// A synchronization context could not be constructed.
    ContextCreation,
    /// The transport failed to deliver a request.
    Transport,
    /// The request was well-formed but not acceptable.
    InvalidRequest,
}

impl ErrorKind {
    /// Returns true if an operation failing with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransactionAborted
                | ErrorKind::UniqueConstraint
                | ErrorKind::Staleness
                | ErrorKind::Transport
        )
    }

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Adapter => "ADAPTER",
            ErrorKind::AdapterInstantiation => "ADAPTER_INSTANTIATION",
            ErrorKind::TransactionAborted => "TRANSACTION_ABORTED",
            ErrorKind::UniqueConstraint => "UNIQUE_CONSTRAINT",
            ErrorKind::Staleness => "STALENESS",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::SchemaConversion => "SCHEMA_CONVERSION",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::ContextCreation => "CONTEXT_CREATION",
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::TransactionAborted.is_retryable());
        assert!(ErrorKind::UniqueConstraint.is_retryable());
        assert!(ErrorKind::Staleness.is_retryable());
        assert!(!ErrorKind::Adapter.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn kind_wire_name_matches_serde() {
        let json = serde_json::to_string(&ErrorKind::TransactionAborted).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::TransactionAborted.as_str()));
    }
}
