//! # RowSync Engine
//!
//! The synchronization agent run by the client.
//!
//! This crate provides:
//! - [`SyncAgent`] - the `Init → FetchRemote → Resolve → ApplyRemote →
//!   ApplyLocal → Done` state machine
//! - Optimistic-concurrency retry with configurable backoff
//! - [`SyncTransport`] and an HTTP transport over any [`HttpClient`]
//! - Progress notifications through [`SyncObserver`]
//!
//! ## Retry model
//!
//! The server accepts a change set only if none of the participating tables
//! moved past the revision the client reconciled against. Otherwise it
//! answers with a staleness rejection and the agent starts over from a
//! fresh fetch. Such restarts are unbounded unless
//! [`RetryConfig::max_attempts`] is set.
//!
//! ## Key Invariants
//!
//! - A run is sequential and blocking from start to finish
//! - A change set is accepted completely or not at all
//! - The local anchor only moves forward

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod agent;
mod config;
mod error;
mod http;
mod observer;
mod transport;

pub use agent::{AgentState, SyncAgent, SyncOutcome, SyncStats};
pub use config::{AgentConfig, RetryConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use observer::{SyncEvent, SyncObserver};
pub use transport::{MockTransport, SyncTransport};
