//! Error types for the driver.

use {
    taskgrid_dispatch::DispatchError, taskgrid_net::NetError, taskgrid_protocol::ProtocolError,
    thiserror::Error, uuid::Uuid,
};

/// Errors that can occur while running the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport-layer failure.
    #[error("transport error: {0}")]
    Net(#[from] NetError),

    /// Dispatch-model failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Wire-format failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The job is not known to this driver.
    #[error("unknown job: {0}")]
    UnknownJob(Uuid),

    /// The node is not known to this driver.
    #[error("unknown node: {0}")]
    UnknownNode(Uuid),

    /// The configured node limit has been reached.
    #[error("maximum nodes reached: {0}")]
    MaxNodesReached(usize),

    /// A forwarded command did not answer within the configured window.
    #[error("command timed out after {0}ms")]
    CommandTimeout(u64),
}

/// Convenience result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
