//! # RowSync Protocol
//!
//! Change model and wire types for RowSync.
//!
//! This crate provides:
//! - [`Value`], [`PrimaryKey`] and [`Row`] for typed row payloads
//! - [`MetadataEntry`], [`Change`] and [`ChangeSet`] for revision-tracked changes
//! - [`Schema`] for table definitions exchanged before the first sync
//! - [`SyncStrategies`] for per-table direction and conflict policy
//! - Transport messages ([`SyncRequest`], [`SyncResponse`]) and their JSON codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod conflict;
mod error;
mod messages;
mod schema;
mod strategy;
mod value;

pub use change::{Change, ChangeSet, MetadataEntry, ReconciledChangeSets, Revision};
pub use codec::JsonCodec;
pub use conflict::{Conflict, Decision, ResolutionKind};
pub use error::{ErrorKind, ProtocolError, ProtocolResult};
pub use messages::{
    Action, ErrorBody, RequestBody, SessionToken, SyncRequest, SyncResponse, ValidationReport,
    STALE_STATUS,
};
pub use schema::{ColumnDef, ColumnType, Schema, TableSchema};
pub use strategy::{ConflictPolicy, Role, SyncDirection, SyncStrategies, TableSyncStrategy};
pub use value::{row_from, PrimaryKey, Row, Value};
