//! Conflict records and resolution decisions.

use crate::change::Change;
use crate::value::{PrimaryKey, Row};
use serde::{Deserialize, Serialize};

/// A row changed on both sides with differing content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The client's change.
    pub client: Change,
    /// The server's change.
    pub server: Change,
}

impl Conflict {
    /// Creates a new conflict.
    pub fn new(client: Change, server: Change) -> Self {
        Self { client, server }
    }

    /// Returns the table.
    pub fn table(&self) -> &str {
        self.server.table()
    }

    /// Returns the row key.
    pub fn primary_key(&self) -> &PrimaryKey {
        self.server.key()
    }

    /// Returns true if both sides still have the row.
    pub fn is_update_conflict(&self) -> bool {
        !self.client.is_delete() && !self.server.is_delete()
    }

    /// Returns true if exactly one side deleted the row.
    pub fn is_update_delete_conflict(&self) -> bool {
        self.client.is_delete() != self.server.is_delete()
    }

    /// Client payload, if the client kept the row.
    pub fn client_payload(&self) -> Option<&Row> {
        self.client.data.as_ref()
    }

    /// Server payload, if the server kept the row.
    pub fn server_payload(&self) -> Option<&Row> {
        self.server.data.as_ref()
    }
}

/// Answer from a conflict decider.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Keep the server's version.
    UseServer,
    /// Keep the client's version.
    UseClient,
    /// Replace the row on both sides with an edited payload.
    UseEdited(Row),
    /// No answer. Treated as [`Decision::UseServer`].
    Cancel,
}

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Server version kept.
    ServerWins,
    /// Client version kept.
    ClientWins,
    /// Edited payload written to both sides.
    UserEdit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::MetadataEntry;
    use crate::value::row_from;

    #[test]
    fn conflict_classification() {
        let live = Change::upsert(
            MetadataEntry::live("t", 1, 2, "aa"),
            row_from([("id", 1)]),
        );
        let other = Change::upsert(
            MetadataEntry::live("t", 1, 3, "bb"),
            row_from([("id", 1)]),
        );
        let dead = Change::delete(MetadataEntry::tombstone("t", 1, 3));

        let c = Conflict::new(live.clone(), other);
        assert!(c.is_update_conflict());
        assert!(!c.is_update_delete_conflict());

        let c = Conflict::new(live, dead);
        assert!(c.is_update_delete_conflict());
        assert!(c.server_payload().is_none());
        assert_eq!(c.table(), "t");
    }
}
