//! JSON encoding for wire types.

use crate::change::{Change, ChangeSet, ReconciledChangeSets};
use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{RequestBody, SyncRequest, SyncResponse};
use crate::schema::Schema;
use crate::strategy::SyncStrategies;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON encode/decode for wire types.
///
/// Both directions run [`JsonCodec::check`], so a value that violates a
/// model invariant can neither leave nor enter a party.
pub trait JsonCodec: Serialize + DeserializeOwned {
    /// Verifies model invariants.
    fn check(&self) -> ProtocolResult<()> {
        Ok(())
    }

    /// Encodes to JSON bytes.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        self.check()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// Encodes to a JSON string.
    fn encode_string(&self) -> ProtocolResult<String> {
        self.check()?;
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON bytes.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value: Self = serde_json::from_slice(bytes)?;
        value.check()?;
        Ok(value)
    }
}

impl JsonCodec for Change {
    fn check(&self) -> ProtocolResult<()> {
        Change::check(self)
    }
}

impl JsonCodec for ChangeSet {
    fn check(&self) -> ProtocolResult<()> {
        ChangeSet::check(self)
    }
}

impl JsonCodec for ReconciledChangeSets {
    fn check(&self) -> ProtocolResult<()> {
        self.to_server.check()?;
        self.to_client.check()
    }
}

impl JsonCodec for Schema {}

impl JsonCodec for SyncStrategies {}

impl JsonCodec for SyncRequest {
    fn check(&self) -> ProtocolResult<()> {
        if self.session.as_str().is_empty() {
            return Err(ProtocolError::incompatible("empty session token"));
        }
        match &self.body {
            RequestBody::ApplyChanges { changes, .. } => changes.check(),
            _ => Ok(()),
        }
    }
}

impl JsonCodec for SyncResponse {
    fn check(&self) -> ProtocolResult<()> {
        match self {
            SyncResponse::Changes { changes } => changes.check(),
            _ => Ok(()),
        }
    }
}
