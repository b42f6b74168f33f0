//! Notification channels registered with a node for one run.
//!
//! Everything a node reports outward (source opened, processing failures,
//! queue-depth boundaries) travels over channels handed to it explicitly,
//! never through ambient callbacks.

use crate::task::error::TaskError;
use crate::task::id::NodeId;
use crate::task::scheduler::Invocation;
use crossbeam_channel::{Sender, TrySendError};

/// Lifecycle and failure notifications emitted by a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A source node finished opening and became active.
    SourceOpened(NodeId),
    /// A processing step returned an error. It is not retried.
    ProcessFailed { node_id: NodeId, error: TaskError },
    /// The node reached `Closed`.
    Closed(NodeId),
}

/// Queue-depth boundary crossed by one input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTransition {
    /// Depth reached the configured maximum.
    Full,
    /// Depth dropped back below the maximum.
    NotFull,
    /// The last queued buffer was taken.
    Empty,
}

/// Relayed to the backpressure controller; the node makes no decision on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub node_id: NodeId,
    pub stream: String,
    pub depth: usize,
    pub transition: QueueTransition,
}

/// Channel registrations supplied to `TaskNode::prepare_for_run`.
#[derive(Default, Clone)]
pub struct RunHooks {
    /// Receives `NodeEvent`s for this run.
    pub events: Option<Sender<NodeEvent>>,
    /// Where prepared invocations go. `None` runs them on the scheduling thread.
    pub invocations: Option<Sender<Invocation>>,
}

impl RunHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, tx: Sender<NodeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_invocations(mut self, tx: Sender<Invocation>) -> Self {
        self.invocations = Some(tx);
        self
    }

    pub(crate) fn notify(&self, event: NodeEvent) {
        if let Some(tx) = &self.events {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!("Node event channel full, dropping {:?}", event);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

impl std::fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHooks")
            .field("events", &self.events.is_some())
            .field("invocations", &self.invocations.is_some())
            .finish()
    }
}
