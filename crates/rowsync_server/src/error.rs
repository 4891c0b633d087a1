//! Error types for the sync server.

use rowsync_core::CoreError;
use rowsync_protocol::{ErrorBody, ErrorKind, ProtocolError, SessionToken};
use rowsync_storage::AdapterError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request names a session the server does not know.
    #[error("unknown session: {0}")]
    UnknownSession(SessionToken),

    /// The change set exceeds the configured limit.
    #[error("change set of {size} exceeds the limit of {max}")]
    BatchTooLarge {
        /// Submitted size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Core failure, including staleness.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Undecodable payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ServerError {
    /// Maps this error onto the shared error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::UnknownSession(_)
            | ServerError::BatchTooLarge { .. } => ErrorKind::InvalidRequest,
            ServerError::Core(e) => e.kind(),
            ServerError::Adapter(e) => e.kind(),
            ServerError::Protocol(e) => e.kind(),
        }
    }

    /// Returns true if the client caused the failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidRequest | ErrorKind::Serialization | ErrorKind::Staleness
        )
    }

    /// Returns true if the server caused the failure.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Builds the wire error body.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            ServerError::Core(CoreError::Stale { basis, current, .. }) => {
                ErrorBody::stale(*basis, *current)
            }
            other => ErrorBody::new(other.kind(), other.to_string()),
        }
    }
}
