//! Event routing
//!
//! Every subscription owns a [`Router`] holding the handlers of the
//! consumers attached to it. The transport pushes inbound notes into the
//! router through an [`EventSink`]; each note is handed to every handler in
//! registration order before the next note is accepted.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::note::Note;

use super::key::{ChannelKey, ConsumerId};
use super::refset::{Attached, RefSet};

/// Callback invoked for each note delivered to a consumer
pub type NoteHandler = Arc<dyn Fn(Arc<Note>) + Send + Sync>;

/// Per-subscription fan-out of inbound notes
pub(crate) struct Router {
    key: ChannelKey,
    handlers: Mutex<RefSet<ConsumerId, NoteHandler>>,
}

impl Router {
    pub(crate) fn new(key: ChannelKey) -> Self {
        Self {
            key,
            handlers: Mutex::new(RefSet::new()),
        }
    }

    // Handlers run outside the lock, so a poisoned guard still holds a
    // consistent set.
    fn handlers(&self) -> MutexGuard<'_, RefSet<ConsumerId, NoteHandler>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn register(&self, consumer: ConsumerId, handler: NoteHandler) -> Attached {
        self.handlers().attach(consumer, handler)
    }

    pub(crate) fn unregister(&self, consumer: &ConsumerId) -> Option<NoteHandler> {
        self.handlers().detach(consumer)
    }

    /// Drop every handler
    pub(crate) fn clear(&self) {
        self.handlers().drain_unless(|_| false);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.handlers().len()
    }

    pub(crate) fn consumers(&self) -> Vec<ConsumerId> {
        self.handlers().keys().copied().collect()
    }

    /// Deliver a note to every registered handler
    ///
    /// Returns the number of handlers that completed without panicking.
    pub(crate) fn dispatch(&self, note: Note) -> usize {
        let snapshot: Vec<(ConsumerId, NoteHandler)> = {
            let handlers = self.handlers();
            handlers
                .keys()
                .copied()
                .zip(handlers.values().cloned())
                .collect()
        };

        let note = Arc::new(note);
        let mut delivered = 0;

        for (consumer, handler) in snapshot {
            let note = Arc::clone(&note);
            match panic::catch_unwind(AssertUnwindSafe(|| handler(note))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(
                        key = %self.key,
                        consumer = %consumer,
                        "Note handler panicked"
                    );
                }
            }
        }

        tracing::trace!(key = %self.key, delivered = delivered, "Note dispatched");
        delivered
    }
}

/// Inbound end of a subscription, handed to the transport
///
/// Cloning is cheap. Notes must be delivered one at a time, in the order
/// they arrive on the connection.
#[derive(Clone)]
pub struct EventSink {
    router: Arc<Router>,
}

impl EventSink {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Subscription this sink feeds
    pub fn key(&self) -> &ChannelKey {
        &self.router.key
    }

    /// Deliver a decoded note
    pub fn deliver(&self, note: Note) -> usize {
        self.router.dispatch(note)
    }

    /// Decode a raw `note` event body and deliver it
    ///
    /// Frames that do not decode are logged and dropped.
    pub fn deliver_raw(&self, frame: Bytes) -> usize {
        match serde_json::from_slice::<Note>(&frame) {
            Ok(note) => self.deliver(note),
            Err(e) => {
                tracing::warn!(
                    key = %self.router.key,
                    error = %e,
                    size = frame.len(),
                    "Dropping malformed note frame"
                );
                0
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("key", &self.router.key)
            .finish()
    }
}
