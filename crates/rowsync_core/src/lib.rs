//! # RowSync Core
//!
//! The synchronization core shared by clients and servers.
//!
//! This crate provides:
//! - [`Fingerprinter`] - order-independent row digests
//! - [`ChangeTracker`] - detects application writes and records them in
//!   metadata
//! - [`ChangeEnumerator`] - builds the change set a party offers
//! - [`ConflictEngine`] - merges two change sets into per-side apply sets
//! - [`ChangeApplier`] - applies a change set inside one transaction
//!
//! ## Roles
//!
//! On a server every metadata row carries the global revision at which it
//! last changed. On a client the revision counter holds the sync anchor
//! and unsynchronized local edits are flagged dirty.
//!
//! ## Example
//!
//! ```rust
//! use rowsync_core::{ChangeEnumerator, SyncSettings};
//! use rowsync_protocol::{ColumnDef, ColumnType, Role, Schema, SyncStrategies, TableSchema};
//! use rowsync_storage::{MemoryAdapter, StorageAdapter};
//!
//! let settings = SyncSettings::new(SyncStrategies::new(["categories"]));
//! let mut server = MemoryAdapter::new();
//! server
//!     .apply_schema(&Schema::new().with_table(TableSchema::new(
//!         "categories",
//!         "id",
//!         vec![ColumnDef::new("id", ColumnType::Integer)],
//!     )))
//!     .unwrap();
//! server.ensure_metadata_schema(Role::Server).unwrap();
//! server.ensure_metadata_table("categories").unwrap();
//!
//! let set = ChangeEnumerator::new(&settings.strategies)
//!     .server_changes(&server, 0)
//!     .unwrap();
//! assert!(set.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod applier;
mod conflict;
mod enumerator;
mod error;
mod fingerprint;
mod settings;
mod tracker;
mod transaction;

pub use applier::ChangeApplier;
pub use conflict::{
    ChannelDecider, ConflictDecider, ConflictEngine, ConflictReport, ConflictRequest,
    Reconciliation, ResolvedConflict, RowRef,
};
pub use enumerator::{ChangeEnumerator, Enumeration};
pub use error::{CoreError, CoreResult};
pub use fingerprint::{Fingerprinter, HashAlgorithm};
pub use settings::SyncSettings;
pub use tracker::{ChangeTracker, DetectedChanges};
pub use transaction::run_in_transaction;
