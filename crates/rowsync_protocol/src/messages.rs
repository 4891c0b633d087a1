//! Request and response messages for the sync transport.

use crate::change::{ChangeSet, Revision};
use crate::error::ErrorKind;
use crate::schema::Schema;
use crate::strategy::SyncStrategies;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code carried by staleness rejections.
pub const STALE_STATUS: u16 = 409;

/// Opaque identifier tying a client's requests to one synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Creates a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four server-side actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Ask for changes since a revision.
    FetchChanges,
    /// Submit changes against a basis revision.
    ApplyChanges,
    /// Ask for the schema of participating tables.
    FetchSchema,
    /// Check a strategy set and open a session.
    ValidateSettings,
}

impl Action {
    /// Returns the wire name, also used as the endpoint path segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FetchChanges => "fetch-changes",
            Action::ApplyChanges => "apply-changes",
            Action::FetchSchema => "fetch-schema",
            Action::ValidateSettings => "validate-settings",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RequestBody {
    /// Fetch changes newer than `since`.
    FetchChanges {
        /// The client's anchor.
        since: Revision,
        /// Strategies for filtering.
        strategies: SyncStrategies,
    },
    /// Apply changes computed against `basis`.
    ApplyChanges {
        /// The revision the client's reconciliation assumed.
        basis: Revision,
        /// Changes to apply.
        changes: ChangeSet,
    },
    /// Fetch the schema of the session's tables.
    FetchSchema,
    /// Validate strategies and bind them to the session.
    ValidateSettings {
        /// Strategies to validate.
        strategies: SyncStrategies,
    },
}

impl RequestBody {
    /// Returns the action this body belongs to.
    pub fn action(&self) -> Action {
        match self {
            RequestBody::FetchChanges { .. } => Action::FetchChanges,
            RequestBody::ApplyChanges { .. } => Action::ApplyChanges,
            RequestBody::FetchSchema => Action::FetchSchema,
            RequestBody::ValidateSettings { .. } => Action::ValidateSettings,
        }
    }
}

/// A request from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Session the request belongs to.
    pub session: SessionToken,
    /// Action payload.
    #[serde(flatten)]
    pub body: RequestBody,
}

impl SyncRequest {
    /// Creates a request.
    pub fn new(session: SessionToken, body: RequestBody) -> Self {
        Self { session, body }
    }

    /// Returns the request's action.
    pub fn action(&self) -> Action {
        self.body.action()
    }
}

/// Outcome of settings validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Human-readable problems. Empty when valid.
    pub problems: Vec<String>,
}

impl ValidationReport {
    /// Returns true if no problems were found.
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Error payload returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind.
    pub kind: ErrorKind,
    /// Description.
    pub message: String,
    /// Optional status code. [`STALE_STATUS`] for staleness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorBody {
    /// Creates an error body without status.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Creates a staleness rejection.
    pub fn stale(basis: Revision, current: Revision) -> Self {
        Self {
            kind: ErrorKind::Staleness,
            message: format!("basis revision {basis} is older than server revision {current}"),
            status: Some(STALE_STATUS),
        }
    }

    /// Returns true if this body signals staleness.
    pub fn is_stale(&self) -> bool {
        self.kind == ErrorKind::Staleness || self.status == Some(STALE_STATUS)
    }
}

/// A response from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum SyncResponse {
    /// Answer to [`RequestBody::FetchChanges`].
    Changes {
        /// Server changes.
        changes: ChangeSet,
    },
    /// Answer to [`RequestBody::ApplyChanges`].
    Applied {
        /// The server's new revision.
        revision: Revision,
    },
    /// Answer to [`RequestBody::FetchSchema`].
    Schema {
        /// Table definitions.
        schema: Schema,
    },
    /// Answer to [`RequestBody::ValidateSettings`].
    Validation {
        /// Result of validation.
        report: ValidationReport,
    },
    /// Failure of any action.
    Error {
        /// Error details.
        error: ErrorBody,
    },
}

impl SyncResponse {
    /// Creates an error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        SyncResponse::Error {
            error: ErrorBody::new(kind, message),
        }
    }

    /// Returns true for error responses.
    pub fn is_error(&self) -> bool {
        matches!(self, SyncResponse::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_json_shape() {
        let req = SyncRequest::new(SessionToken::new("s1"), RequestBody::FetchSchema);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["session"], "s1");
        assert_eq!(json["action"], "fetch-schema");
        assert_eq!(req.action().as_str(), "fetch-schema");
    }

    #[test]
    fn stale_body() {
        let body = ErrorBody::stale(3, 5);
        assert!(body.is_stale());
        assert_eq!(body.status, Some(409));
        assert!(!ErrorBody::new(ErrorKind::Adapter, "x").is_stale());
    }

    #[test]
    fn response_tag() {
        let resp = SyncResponse::Applied { revision: 4 };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], "applied");
        assert_eq!(json["revision"], 4);
    }
}
