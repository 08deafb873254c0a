//! In-flight call correlation.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use ringrpc_common::{RequestId, Result, ResultEnvelope, RingrpcError};

/// Receives the outcome of one registered call.
pub type PendingReceiver = oneshot::Receiver<Result<ResultEnvelope>>;

/// Identifies the connection a call was sent on.
pub type ConnectionId = u64;

struct PendingEntry {
    sender: oneshot::Sender<Result<ResultEnvelope>>,
    connection: ConnectionId,
}

/// Maps request ids to the callers waiting on them.
///
/// A caller registers before sending; the connection's reader resolves the
/// entry when the matching response arrives. Every entry is completed or
/// removed exactly once: by [`resolve`](Self::resolve), [`fail`](Self::fail),
/// [`fail_connection`](Self::fail_connection) or [`cancel`](Self::cancel).
///
/// Entries belong to the connection they were sent on; tearing a connection
/// down fails only its own calls.
///
/// Safe to use from the reader tasks and calling tasks concurrently.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<RequestId, PendingEntry>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call about to be sent on `connection`.
    pub fn register(&self, request_id: RequestId, connection: ConnectionId) -> PendingReceiver {
        let (sender, receiver) = oneshot::channel();
        self.calls
            .insert(request_id, PendingEntry { sender, connection });
        receiver
    }

    /// Completes the call `result` answers.
    ///
    /// Returns `false` for a response nobody waits for (late, duplicate or
    /// already cancelled); that is logged, not an error.
    pub fn resolve(&self, result: ResultEnvelope) -> bool {
        match self.calls.remove(&result.request_id) {
            Some((request_id, entry)) => {
                debug!(request_id = %request_id, connection = entry.connection, "call resolved");
                // The caller may have stopped waiting.
                let _ = entry.sender.send(Ok(result));
                true
            }
            None => {
                warn!(request_id = %result.request_id, "response for unknown request");
                false
            }
        }
    }

    /// Completes the call with an error.
    pub fn fail(&self, request_id: RequestId, error: RingrpcError) -> bool {
        match self.calls.remove(&request_id) {
            Some((_, entry)) => {
                let _ = entry.sender.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fails every call sent on `connection` with a connection error.
    ///
    /// Returns how many calls were failed.
    pub fn fail_connection(&self, connection: ConnectionId, reason: &str) -> usize {
        let ids: Vec<RequestId> = self
            .calls
            .iter()
            .filter(|e| e.value().connection == connection)
            .map(|e| *e.key())
            .collect();

        let mut failed = 0;
        for id in ids {
            if self.fail(id, RingrpcError::Connection(reason.to_string())) {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(connection, failed, reason, "failed pending calls");
        }
        failed
    }

    /// Drops the entry without completing it (deadline expired).
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.calls.remove(&request_id).is_some()
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.calls.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
