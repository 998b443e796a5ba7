//! Pending-request registry.
//!
//! Correlates requests to responses across the writer/reader task boundary.
//! A caller registers its request id before the frame is queued for send and
//! awaits the returned receiver with a timeout bound; the reader task
//! delivers the matching response and wakes exactly one waiter. Entries never
//! outlive their request: completion, timeout ([`PendingRequests::abandon`])
//! and disconnect ([`PendingRequests::fail_all`]) all remove them.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{ClientError, Result};
use crate::protocol::Message;

/// Registry of in-flight request ids awaiting their responses.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<u32, oneshot::Sender<Message>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request id and return the receiver its response will be
    /// delivered on.
    ///
    /// Fails with `DuplicateRequestId` if the id is already pending; under
    /// correct id generation this does not occur.
    pub(crate) fn register(&self, request_id: u32) -> Result<oneshot::Receiver<Message>> {
        let mut entries = self.entries.lock().expect("pending registry poisoned");
        if entries.contains_key(&request_id) {
            return Err(ClientError::DuplicateRequestId(request_id));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(request_id, tx);
        Ok(rx)
    }

    /// Deliver a response to its waiter.
    ///
    /// Returns the response back when no entry exists for its request id so
    /// the caller can report it; this is a protocol-level error but not a
    /// fatal one.
    pub(crate) fn deliver(&self, response: Message) -> std::result::Result<(), Message> {
        let tx = {
            let mut entries = self.entries.lock().expect("pending registry poisoned");
            entries.remove(&response.request_id())
        };
        match tx {
            // A send error means the waiter gave up between removal and
            // delivery; the entry is gone either way.
            Some(tx) => {
                let _ = tx.send(response);
                Ok(())
            }
            None => Err(response),
        }
    }

    /// Drop the entry for a request that timed out, so the id cannot go
    /// stale in the registry.
    pub(crate) fn abandon(&self, request_id: u32) {
        let mut entries = self.entries.lock().expect("pending registry poisoned");
        entries.remove(&request_id);
    }

    /// Drop every entry, waking all waiters with a closed channel. Called
    /// when the connection goes away.
    pub(crate) fn fail_all(&self) {
        let mut entries = self.entries.lock().expect("pending registry poisoned");
        entries.clear();
    }

    /// Number of requests currently awaiting a response.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("pending registry poisoned").len()
    }
}
