//! Configuration for the driver.

use taskgrid_net::NetConfig;

/// Driver-wide configuration.
///
/// All values are read once at construction; there is no hot reload.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Transport configuration (bind address, buffer sizes, frame limit).
    pub net: NetConfig,

    /// Maximum number of tasks grouped into one dispatch bundle.
    pub max_tasks_per_bundle: usize,

    /// Maximum number of worker nodes this driver accepts.
    pub max_nodes: usize,

    /// Seconds a node may stay silent before it is considered dead.
    pub node_timeout_secs: u64,

    /// Milliseconds before an unanswered dispatch is expired, or `None` to
    /// disable the watcher. Expiration is the only path that converts a
    /// stalled dispatch into a retry or a terminal per-task cancellation.
    pub dispatch_expiration_ms: Option<u64>,

    /// Milliseconds to wait for each node when forwarding a management
    /// command.
    pub command_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            max_tasks_per_bundle: 16,
            max_nodes: 200,
            node_timeout_secs: 30,
            dispatch_expiration_ms: Some(60_000),
            command_timeout_ms: 5_000,
        }
    }
}

impl DriverConfig {
    /// Config for local testing: ephemeral port, tight timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            net: NetConfig::dev_default(),
            max_tasks_per_bundle: 4,
            max_nodes: 10,
            node_timeout_secs: 5,
            dispatch_expiration_ms: Some(1_000),
            command_timeout_ms: 1_000,
        }
    }
}
