//! Error types for the dispatch model.

use thiserror::Error;

/// Errors that can occur while building or driving dispatch bundles.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The header's declared task count differs from the actual task set.
    /// Fatal for bundle construction.
    #[error("task count mismatch: header declares {declared}, bundle holds {actual}")]
    TaskCountMismatch {
        /// Count declared by the header.
        declared: usize,
        /// Number of tasks actually supplied.
        actual: usize,
    },

    /// The bundle is already bound to a channel and has not completed.
    #[error("bundle {0} is already dispatched")]
    AlreadyDispatched(u64),

    /// A job was constructed with an invalid dependency graph.
    #[error("invalid task graph: {0}")]
    InvalidGraph(#[from] taskgrid_protocol::ProtocolError),
}

/// Convenience result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
