//! Error types for the synchronization agent.

use rowsync_core::CoreError;
use rowsync_protocol::{Action, ErrorBody, ErrorKind, ProtocolError};
use rowsync_storage::AdapterError;
use thiserror::Error;

/// Result type for agent operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed or incompatible wire payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server rejected the submitted set as stale.
    #[error("stale: {0}")]
    Stale(String),

    /// The server answered with an error.
    #[error("server error ({kind}): {message}")]
    Remote {
        /// Error kind reported by the server.
        kind: ErrorKind,
        /// Server message.
        message: String,
    },

    /// The server answered with the wrong response type.
    #[error("unexpected response to {action}")]
    UnexpectedResponse {
        /// The request's action.
        action: Action,
    },

    /// Local core failure.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Local storage failure.
    #[error("storage error: {0}")]
    Adapter(#[from] AdapterError),

    /// Local and remote settings or schemas disagree.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Converts a server error body.
    pub fn from_remote(body: ErrorBody) -> Self {
        if body.is_stale() {
            Self::Stale(body.message)
        } else {
            Self::Remote {
                kind: body.kind,
                message: body.message,
            }
        }
    }

    /// Returns true for staleness rejections.
    pub fn is_stale(&self) -> bool {
        match self {
            SyncError::Stale(_) => true,
            SyncError::Core(e) => e.is_stale(),
            _ => false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Stale(_) => true,
            SyncError::Remote { kind, .. } => kind.is_retryable(),
            SyncError::Core(e) => e.is_retryable(),
            SyncError::Adapter(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Maps this error onto the shared error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport { .. } => ErrorKind::Transport,
            SyncError::Protocol(e) => e.kind(),
            SyncError::Stale(_) => ErrorKind::Staleness,
            SyncError::Remote { kind, .. } => *kind,
            SyncError::UnexpectedResponse { .. } => ErrorKind::Serialization,
            SyncError::Core(e) => e.kind(),
            SyncError::Adapter(e) => e.kind(),
            SyncError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Stale("moved".into()).is_retryable());
        assert!(SyncError::Adapter(AdapterError::TransactionAborted("busy".into())).is_retryable());
        assert!(!SyncError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn remote_bodies() {
        let stale = SyncError::from_remote(ErrorBody::stale(3, 5));
        assert!(stale.is_stale());
        assert_eq!(stale.kind(), ErrorKind::Staleness);

        let other = SyncError::from_remote(ErrorBody::new(ErrorKind::Adapter, "disk full"));
        assert!(!other.is_stale());
        assert!(!other.is_retryable());
        assert_eq!(other.kind(), ErrorKind::Adapter);
        assert!(other.to_string().contains("disk full"));
    }

    #[test]
    fn core_staleness_is_staleness() {
        let err = SyncError::from(CoreError::Stale {
            table: "t".into(),
            basis: 1,
            current: 2,
        });
        assert!(err.is_stale());
        assert_eq!(err.kind(), ErrorKind::Staleness);
    }
}
