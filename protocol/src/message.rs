//! Message types and serialization for driver/node communication.
//!
//! All messages are serialized with bincode for compact wire representation.
//! The [`WireMessage`] enum is the top-level wire type — every byte sequence
//! on a taskgrid channel is a length-prefixed bincode encoding of this enum,
//! except for the 4-byte raw control value exchanged during the channel
//! handshake (which is the state machine's business, not this module's).

use {
    crate::{
        error::{ProtocolError, Result},
        header::BundleHeader,
    },
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

// ── Task payloads and results ───────────────────────────────────────────────

/// The already-materialized result of a dependency task, attached to a
/// dispatch so the executing node can hand it to the dependant task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyResult {
    /// Position of the dependency task within the job.
    pub position: u32,
    /// Its serialized result.
    pub result: Vec<u8>,
}

/// One task as shipped to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    /// Position of the task within the job. Unique and stable.
    pub position: u32,
    /// Opaque serialized task body. The driver never decodes this.
    pub payload: Vec<u8>,
    /// Results of this task's dependencies, if any.
    pub dependencies: Vec<DependencyResult>,
}

/// Outcome of executing one task on a node.
///
/// An execution error is data, not a failure of the bundle or the job — it
/// travels back inside the normal result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The task completed and produced a serialized result.
    Success(Vec<u8>),
    /// The task raised an error while executing remotely.
    Error(String),
}

/// Result of one task, keyed by its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReturn {
    /// Position of the task within the job.
    pub position: u32,
    /// What happened.
    pub outcome: TaskOutcome,
}

/// Outcome of a forwarded management command on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// The command executed and produced a serialized result.
    Success(Vec<u8>),
    /// The command failed on the node.
    Error(String),
}

// ── Wire message ────────────────────────────────────────────────────────────

/// Top-level driver/node message.
///
/// Every frame on a taskgrid channel carries exactly one of these variants,
/// length-prefixed and bincode-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Node identification, sent once after the raw handshake.
    Hello {
        /// The node's identity.
        node_uuid: Uuid,
        /// The node's management/control port.
        control_port: u16,
        /// How many tasks the node accepts per dispatch.
        max_tasks: usize,
    },

    /// One dispatch bundle: header plus the tasks to execute.
    JobDispatch {
        /// The bundle header.
        header: BundleHeader,
        /// The tasks in this bundle.
        tasks: Vec<TaskData>,
    },

    /// Results for a previously dispatched bundle.
    JobResults {
        /// Id of the bundle these results answer.
        bundle_id: u64,
        /// Uuid of the owning job.
        job_uuid: Uuid,
        /// Per-task outcomes.
        results: Vec<TaskReturn>,
    },

    /// Driver-initiated cancellation of an in-flight bundle.
    CancelBundle {
        /// Id of the bundle to cancel.
        bundle_id: u64,
        /// Uuid of the owning job.
        job_uuid: Uuid,
    },

    /// A management command forwarded to a node.
    Command {
        /// Correlation id matching the response to the request.
        command_id: u64,
        /// Opaque command payload.
        payload: Vec<u8>,
    },

    /// Response to a forwarded management command.
    CommandResponse {
        /// Correlation id of the original command.
        command_id: u64,
        /// Result or error.
        outcome: CommandOutcome,
    },

    /// Lightweight keep-alive ping.
    Heartbeat {
        /// Sender identity.
        node_uuid: Uuid,
    },

    /// Response to a heartbeat.
    HeartbeatAck,
}

// ── Serialisation helpers ───────────────────────────────────────────────────

impl WireMessage {
    /// Serialize this message to bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(ProtocolError::Serialization)
    }

    /// Deserialize a message from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(ProtocolError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    ///
    /// Wire format: `[len: u32-le][payload: len bytes]`
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        if payload.len() > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: max_size,
            });
        }
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4usize.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; 4]) -> usize {
        u32::from_le_bytes(*header) as usize
    }

    /// Return a human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::JobDispatch { .. } => "job_dispatch",
            Self::JobResults { .. } => "job_results",
            Self::CancelBundle { .. } => "cancel_bundle",
            Self::Command { .. } => "command",
            Self::CommandResponse { .. } => "command_response",
            Self::Heartbeat { .. } => "heartbeat",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, crate::sla::JobSla};

    #[test]
    fn test_roundtrip_heartbeat() {
        let msg = WireMessage::Heartbeat {
            node_uuid: Uuid::new_v4(),
        };
        let bytes = msg.serialize().unwrap();
        let decoded = WireMessage::deserialize(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_framed_roundtrip() {
        let header = BundleHeader::new(Uuid::new_v4(), "framed", 1, JobSla::default());
        let msg = WireMessage::JobDispatch {
            header,
            tasks: vec![TaskData {
                position: 0,
                payload: vec![1, 2, 3],
                dependencies: vec![],
            }],
        };
        let framed = msg.serialize_framed(1_048_576).unwrap();
        let len = WireMessage::read_frame_len(framed[..4].try_into().unwrap());
        let decoded = WireMessage::deserialize(&framed[4..4usize.saturating_add(len)]).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_message_too_large() {
        let msg = WireMessage::HeartbeatAck;
        let result = msg.serialize_framed(0);
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_tags() {
        let msg = WireMessage::CancelBundle {
            bundle_id: 7,
            job_uuid: Uuid::new_v4(),
        };
        assert_eq!(msg.kind(), "cancel_bundle");
    }
}
