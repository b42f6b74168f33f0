//! Error types for the task scheduling core.

use crate::task::id::NodeId;
use thiserror::Error;

/// Errors that can occur within the task node core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Invalid node configuration, reported synchronously by `prepare_for_run`.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stage does not implement the requested control command.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The node's processing step failed.
    #[error("Node {node_id} error: {message}")]
    Process { node_id: NodeId, message: String },

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// No stream name was given and the context has several streams.
    #[error("Ambiguous stream: {count} streams configured and none named")]
    AmbiguousStream { count: usize },

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    #[error("No buffer available: {0}")]
    BufferUnavailable(String),

    /// A lifecycle call arrived in a status that cannot accept it.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TaskError {
    pub fn process(node_id: NodeId, message: impl Into<String>) -> Self {
        TaskError::Process {
            node_id,
            message: message.into(),
        }
    }
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskError::process(NodeId(7), "decoder stalled");
        assert_eq!(err.to_string(), "Node NodeId(7) error: decoder stalled");

        let err = TaskError::AmbiguousStream { count: 2 };
        assert!(err.to_string().contains("2 streams"));
    }
}
