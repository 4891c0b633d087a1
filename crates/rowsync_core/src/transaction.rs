//! Transaction helper with commit retry.

use crate::error::{CoreError, CoreResult};
use rowsync_storage::StorageAdapter;
use tracing::{debug, warn};

/// Runs `work` inside a transaction and commits it.
///
/// `work` is re-run from scratch, in a new transaction, when beginning,
/// working or committing fails with a retryable adapter error
/// (`TransactionAborted`, `UniqueConstraint`), up to `max_attempts` tries.
/// Any other error rolls back and is returned unchanged; staleness is
/// never retried here. The last retryable failure is surfaced once
/// attempts run out.
pub fn run_in_transaction<T, F>(
    adapter: &mut dyn StorageAdapter,
    max_attempts: u32,
    mut work: F,
) -> CoreResult<T>
where
    F: FnMut(&mut dyn StorageAdapter) -> CoreResult<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match adapter.begin() {
            Ok(()) => match work(&mut *adapter) {
                Ok(value) => adapter.commit().map(|()| value).map_err(CoreError::from),
                Err(err) => Err(err),
            },
            Err(err) => Err(CoreError::from(err)),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "transaction committed after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if adapter.in_transaction() {
                    if let Err(rollback) = adapter.rollback() {
                        warn!(error = %rollback, "rollback failed");
                    }
                }
                let retryable = matches!(&err, CoreError::Adapter(e) if e.is_retryable());
                if !retryable || attempt >= max_attempts {
                    return Err(err);
                }
                warn!(attempt, max_attempts, error = %err, "retrying transaction");
            }
        }
    }
}
