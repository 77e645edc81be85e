//! Error types for the taskgrid transport layer.

use {taskgrid_protocol::ProtocolError, thiserror::Error};

/// Errors that can occur in the transport layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-format error from the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer violated the wire protocol. Fatal for the channel only.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A blocking receive timed out.
    #[error("receive timed out after {0}ms")]
    Timeout(u64),

    /// The transport was already closed by a previous error or `close()`.
    #[error("transport is closed")]
    TransportClosed,

    /// The channel's outbound queue is gone (channel task exited).
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, NetError>;
