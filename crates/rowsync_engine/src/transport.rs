//! Transport abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use rowsync_protocol::{SyncRequest, SyncResponse};
use std::collections::VecDeque;
use std::sync::Arc;

/// Carries requests to the server and brings back its answers.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, scripted mocks).
///
/// # Errors
///
/// Implementations return [`SyncError::Transport`] when the exchange
/// itself failed and [`SyncError::Protocol`] when the answer could not be
/// decoded. A well-formed error answer from the server is returned as
/// `Ok(SyncResponse::Error { .. })`.
pub trait SyncTransport: Send + Sync {
    /// Sends one request and waits for its response.
    fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        (**self).exchange(request)
    }
}

/// A scripted transport for testing.
///
/// Answers come from a queue in the order they were pushed; every request
/// is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl MockTransport {
    /// Creates a mock with no scripted answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of answers not yet consumed.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(SyncError::transport_fatal(format!(
                "no scripted response for {}",
                request.action()
            )))
        })
    }
}
