//! Error types for the taskgrid wire protocol.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A task dependency graph contains a cycle.
    #[error("dependency cycle involving task position {0}")]
    DependencyCycle(u32),

    /// A graph edge references a position that is not part of the job.
    #[error("unknown task position {0} in dependency graph")]
    UnknownPosition(u32),
}

/// Convenience result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
