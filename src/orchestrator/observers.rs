//! Observer registry: live session progress for attached clients.
//!
//! Any number of observers may attach to a running session; each receives
//! progress events on its own channel from the point of attachment onward.
//! Attach returns a snapshot (stage, active subtask, operation count) so
//! late joiners can request a replay from the persistence layer instead of
//! racing the live stream. Observers never receive mutation rights; the
//! attempt loop is the sole writer.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::operation::Operation;
use crate::models::session::Stage;
use crate::provider::StreamFailure;

/// A progress notification published to attached observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session stage or active subtask changed.
    StageChanged {
        /// New stage value.
        stage: Stage,
        /// Active subtask name, if any.
        subtask: Option<String>,
    },
    /// An operation was emitted and forwarded to the sink.
    OperationProduced {
        /// Emission sequence number within the session.
        seq: u64,
        /// The emitted operation.
        operation: Operation,
    },
    /// The sink rejected an operation; the session continues.
    SinkRejected {
        /// Emission sequence number of the rejected operation.
        seq: u64,
        /// Target path of the rejected operation.
        path: String,
        /// Sink error description.
        error: String,
    },
    /// The session finished and the result was persisted.
    Finished {
        /// Total operations emitted over the session.
        operations_emitted: u64,
    },
    /// The session failed terminally.
    Failed {
        /// Classified terminal failure.
        failure: StreamFailure,
    },
}

/// Snapshot returned on attach so late joiners know where the session is.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachSnapshot {
    /// Stage at attachment time.
    pub stage: Stage,
    /// Active subtask at attachment time, if any.
    pub subtask: Option<String>,
    /// Operations emitted before attachment.
    pub operations_emitted: u64,
}

/// Identifies one attached observer. Carries only routing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverHandle {
    id: String,
}

impl ObserverHandle {
    /// The observer's registry identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Membership and latest-snapshot state guarded by one mutex.
#[derive(Debug)]
struct Inner {
    observers: HashMap<String, mpsc::Sender<SessionEvent>>,
    snapshot: AttachSnapshot,
}

/// Concurrent-safe registry of attached observers.
#[derive(Debug)]
pub struct ObserverRegistry {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ObserverRegistry {
    /// Construct an empty registry with the given per-observer channel
    /// capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                observers: HashMap::new(),
                snapshot: AttachSnapshot {
                    stage: Stage::Starting,
                    subtask: None,
                    operations_emitted: 0,
                },
            }),
        }
    }

    /// Attach a new observer.
    ///
    /// Returns the handle, the event receiver (events from this point
    /// onward; no history replay), and the current snapshot.
    pub async fn attach(&self) -> (ObserverHandle, mpsc::Receiver<SessionEvent>, AttachSnapshot) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = ObserverHandle {
            id: Uuid::new_v4().to_string(),
        };

        let mut inner = self.inner.lock().await;
        inner.observers.insert(handle.id.clone(), tx);
        let snapshot = inner.snapshot.clone();
        debug!(observer = %handle.id, observers = inner.observers.len(), "observer attached");
        (handle, rx, snapshot)
    }

    /// Detach an observer; its receiver yields no further events.
    pub async fn detach(&self, handle: &ObserverHandle) {
        let mut inner = self.inner.lock().await;
        if inner.observers.remove(&handle.id).is_some() {
            debug!(observer = %handle.id, "observer detached");
        }
    }

    /// Publish an event to every attached observer.
    ///
    /// A lagging observer (full channel) misses the event; a closed channel
    /// detaches the observer. Neither blocks the publishing loop.
    pub async fn broadcast(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().await;
        apply_to_snapshot(&mut inner.snapshot, &event);

        let mut closed = Vec::new();
        for (id, tx) in &inner.observers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(observer = %id, ?event, "observer lagging, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }
        for id in closed {
            inner.observers.remove(&id);
            debug!(observer = %id, "observer channel closed, detached");
        }
    }

    /// Number of currently attached observers.
    pub async fn observer_count(&self) -> usize {
        self.inner.lock().await.observers.len()
    }
}

/// Fold an outgoing event into the attach snapshot.
fn apply_to_snapshot(snapshot: &mut AttachSnapshot, event: &SessionEvent) {
    match event {
        SessionEvent::StageChanged { stage, subtask } => {
            snapshot.stage = *stage;
            snapshot.subtask.clone_from(subtask);
        }
        SessionEvent::OperationProduced { seq, .. } => {
            snapshot.operations_emitted = seq + 1;
        }
        SessionEvent::SinkRejected { .. }
        | SessionEvent::Finished { .. }
        | SessionEvent::Failed { .. } => {}
    }
}
