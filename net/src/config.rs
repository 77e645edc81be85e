//! Configuration for the taskgrid transport layer.

use std::net::SocketAddr;

/// Configuration for channels, listeners and buffer management.
///
/// All values are read once when the owning component is constructed; there
/// is no hot reload.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Local address the driver listener binds on.
    /// Default: `0.0.0.0:11111`
    pub bind_addr: SocketAddr,

    /// Control port advertised to peers during the channel handshake.
    pub control_port: u16,

    /// OS receive-buffer size requested for every socket.
    pub receive_buffer_size: usize,

    /// Maximum size of one pooled I/O chunk. Bounds per-read allocation.
    pub max_chunk_size: usize,

    /// Maximum size of a single serialized message in bytes.
    /// Task payloads dominate; headers and control messages are tiny.
    pub max_message_size: usize,

    /// Size of the internal channel-event queue.
    pub channel_buffer_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:11111".parse().expect("valid default bind addr"),
            control_port: 11111,
            receive_buffer_size: 1_048_576,
            max_chunk_size: 32_768,
            max_message_size: 4_194_304, // 4 MB
            channel_buffer_size: 10_000,
        }
    }
}

impl NetConfig {
    /// Create a config suitable for local testing: ephemeral port, small
    /// buffers.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("valid dev bind addr"),
            control_port: 0,
            receive_buffer_size: 65_536,
            max_chunk_size: 1_024,
            max_message_size: 1_048_576,
            channel_buffer_size: 1_000,
        }
    }
}
