//! Progress notifications.

use crate::agent::SyncOutcome;
use rowsync_protocol::PrimaryKey;

/// A milestone of a synchronization run.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An attempt starts fetching change sets.
    FetchStarted {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A row was changed differently on both sides.
    ConflictDetected {
        /// Table name.
        table: String,
        /// Row key.
        key: PrimaryKey,
    },
    /// Reconciled sets are about to be applied.
    Applying {
        /// Changes sent to the server.
        to_server: usize,
        /// Changes applied locally.
        to_client: usize,
    },
    /// The server rejected the attempt as stale.
    StaleRetry {
        /// The rejected attempt.
        attempt: u32,
    },
    /// The run completed.
    Finished(SyncOutcome),
}

/// Receives [`SyncEvent`]s.
///
/// Observers are called on the thread running the synchronization and
/// must not block for long.
pub trait SyncObserver: Send {
    /// Called for every event.
    fn on_event(&self, event: &SyncEvent);
}

impl<F> SyncObserver for F
where
    F: Fn(&SyncEvent) + Send,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}
