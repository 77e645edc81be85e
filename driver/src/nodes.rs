//! Worker-node tracking.
//!
//! The [`NodeManager`] is the single source of truth for "which nodes are we
//! talking to?". The dispatcher consults it to find a free node before
//! sending a bundle and updates it on every lifecycle event.

use {
    crate::error::{DriverError, Result},
    log::{debug, info, warn},
    std::{collections::HashMap, net::SocketAddr, time::Instant},
    taskgrid_net::ChannelId,
    uuid::Uuid,
};

/// Static identity of a worker node, learned from its `Hello` message.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// The node's identity.
    pub uuid: Uuid,
    /// The socket address the channel came from.
    pub addr: SocketAddr,
    /// The node's control port, from the channel handshake.
    pub control_port: u16,
    /// How many tasks the node accepts per dispatch.
    pub max_tasks: usize,
}

/// Per-node connection bookkeeping.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    /// Static identity and address.
    pub info: NodeInfo,
    /// The channel currently carrying this node.
    pub channel: ChannelId,
    /// Wall-clock time of the last message received from this node.
    pub last_seen: Instant,
    /// Counter: bundles dispatched to this node.
    pub bundles_dispatched: u64,
    /// Counter: bundles this node completed.
    pub bundles_completed: u64,
    /// Whether we believe the connection is currently alive.
    pub is_connected: bool,
    /// The bundle currently executing on this node, if any.
    pub current_bundle: Option<u64>,
}

impl NodeConnection {
    fn new(info: NodeInfo, channel: ChannelId) -> Self {
        Self {
            info,
            channel,
            last_seen: Instant::now(),
            bundles_dispatched: 0,
            bundles_completed: 0,
            is_connected: true,
            current_bundle: None,
        }
    }

    /// Seconds since we last heard from this node.
    pub fn silence_secs(&self) -> u64 {
        self.last_seen.elapsed().as_secs()
    }
}

/// Tracks the set of worker nodes.
#[derive(Debug)]
pub struct NodeManager {
    nodes: HashMap<Uuid, NodeConnection>,
    max_nodes: usize,
    node_timeout_secs: u64,
}

impl NodeManager {
    /// Create an empty manager.
    pub fn new(max_nodes: usize, node_timeout_secs: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            max_nodes,
            node_timeout_secs,
        }
    }

    /// Total number of known nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes with a live connection.
    pub fn connected_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_connected).count()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Register a node that just identified itself on `channel`.
    ///
    /// A known node reconnecting has its info and channel updated in place.
    pub fn add_node(&mut self, info: NodeInfo, channel: ChannelId) -> Result<()> {
        if let Some(existing) = self.nodes.get_mut(&info.uuid) {
            debug!("node {} reconnected on channel {}", info.uuid, channel);
            existing.info = info;
            existing.channel = channel;
            existing.is_connected = true;
            existing.current_bundle = None;
            existing.last_seen = Instant::now();
            return Ok(());
        }
        if self.nodes.len() >= self.max_nodes {
            return Err(DriverError::MaxNodesReached(self.max_nodes));
        }
        let uuid = info.uuid;
        info!("adding node {} on channel {}", uuid, channel);
        self.nodes.insert(uuid, NodeConnection::new(info, channel));
        Ok(())
    }

    /// Remove a node entirely.
    pub fn remove_node(&mut self, uuid: &Uuid) {
        if self.nodes.remove(uuid).is_some() {
            info!("removed node {}", uuid);
        }
    }

    /// Mark a node as disconnected.
    pub fn mark_disconnected(&mut self, uuid: &Uuid) {
        if let Some(node) = self.nodes.get_mut(uuid) {
            node.is_connected = false;
            node.current_bundle = None;
        }
    }

    /// Record that a message arrived from this node.
    pub fn record_seen(&mut self, uuid: &Uuid) {
        if let Some(node) = self.nodes.get_mut(uuid) {
            node.last_seen = Instant::now();
        }
    }

    /// Record a bundle dispatch to this node.
    pub fn record_dispatch(&mut self, uuid: &Uuid, bundle_id: u64) -> Result<()> {
        let node = self
            .nodes
            .get_mut(uuid)
            .ok_or(DriverError::UnknownNode(*uuid))?;
        node.bundles_dispatched = node.bundles_dispatched.saturating_add(1);
        node.current_bundle = Some(bundle_id);
        Ok(())
    }

    /// Clear the in-flight marker of whichever node carries `bundle_id`.
    pub fn clear_bundle(&mut self, bundle_id: u64) {
        for node in self.nodes.values_mut() {
            if node.current_bundle == Some(bundle_id) {
                node.current_bundle = None;
            }
        }
    }

    /// Record that this node returned its current bundle.
    pub fn record_completion(&mut self, uuid: &Uuid) {
        if let Some(node) = self.nodes.get_mut(uuid) {
            node.bundles_completed = node.bundles_completed.saturating_add(1);
            node.current_bundle = None;
            node.last_seen = Instant::now();
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Get a node's state.
    pub fn get_node(&self, uuid: &Uuid) -> Option<&NodeConnection> {
        self.nodes.get(uuid)
    }

    /// Connected nodes with no bundle in flight, the dispatcher's targets.
    pub fn idle_connected(&self) -> Vec<(Uuid, ChannelId, usize)> {
        self.nodes
            .values()
            .filter(|n| n.is_connected && n.current_bundle.is_none())
            .map(|n| (n.info.uuid, n.channel, n.info.max_tasks))
            .collect()
    }

    /// Every known node uuid.
    pub fn node_uuids(&self) -> Vec<Uuid> {
        self.nodes.keys().copied().collect()
    }

    /// Iterator over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeConnection> {
        self.nodes.values()
    }

    // ── Liveness ────────────────────────────────────────────────────────

    /// Disconnect nodes that have been silent for longer than the
    /// configured timeout. Returns the affected uuids.
    pub fn evict_stale(&mut self) -> Vec<Uuid> {
        let timeout = self.node_timeout_secs;
        let stale: Vec<Uuid> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.is_connected && n.silence_secs() > timeout)
            .map(|(uuid, _)| *uuid)
            .collect();
        for uuid in &stale {
            warn!("evicting stale node {} (silent >{}s)", uuid, timeout);
            self.mark_disconnected(uuid);
        }
        stale
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
