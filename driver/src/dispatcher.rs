//! The dispatcher: binds queued jobs to free node channels.
//!
//! One instance owns the bundle and channel registries and processes every
//! [`ChannelEvent`] coming off the transport. Control flow:
//! a job arrives → `try_dispatch` groups tasks into a bundle for a free node
//! → the bundle ships as a `JobDispatch` frame → `JobResults` frames resolve
//! through the bundle registry back to the job → a channel loss resubmits
//! the affected bundle, and the expiration watcher bounds how long a
//! dispatch may stay unanswered.

use {
    crate::{
        config::DriverConfig,
        error::Result,
        expiry::ExpirationWatcher,
        management::NodeSelector,
        metrics::DriverMetrics,
        nodes::{NodeInfo, NodeManager},
        queue::JobQueue,
    },
    dashmap::DashMap,
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    taskgrid_dispatch::{
        BundleResult, CompletionExecutor, DispatchBundle, DispatchCompletion, Job, JobStatus,
        SubmissionStatus,
    },
    taskgrid_net::{ChannelEvent, ChannelHandle, ChannelId},
    taskgrid_protocol::{CommandOutcome, JobSla, TaskData, TaskGraph, TaskReturn, WireMessage},
    tokio::sync::oneshot,
    uuid::Uuid,
};

/// Completion handle wired to the channel a bundle was dispatched on.
/// Cancelling it tells the node to drop the bundle.
struct ChannelCompletion {
    bundle_id: u64,
    job_uuid: Uuid,
    handle: ChannelHandle,
}

impl DispatchCompletion for ChannelCompletion {
    fn cancel(&self) {
        let _ = self.handle.send_message(&WireMessage::CancelBundle {
            bundle_id: self.bundle_id,
            job_uuid: self.job_uuid,
        });
    }

    fn is_complete(&self) -> bool {
        // The bundle drops this handle when it detaches; while it is
        // reachable the dispatch is still in flight.
        false
    }
}

/// Build the `JobDispatch` frame for a bundle, attaching each task's
/// materialized dependency results.
fn dispatch_message(bundle: &DispatchBundle) -> WireMessage {
    let info = bundle.graph_info();
    let tasks = bundle
        .tasks()
        .iter()
        .map(|task| {
            let task = task.lock();
            let dependencies = info
                .and_then(|gi| {
                    gi.dependencies_map.get(&task.position()).map(|positions| {
                        gi.dependencies
                            .iter()
                            .filter(|dep| positions.contains(&dep.position))
                            .cloned()
                            .collect()
                    })
                })
                .unwrap_or_default();
            TaskData {
                position: task.position(),
                payload: task.payload().to_vec(),
                dependencies,
            }
        })
        .collect();
    WireMessage::JobDispatch {
        header: bundle.header().clone(),
        tasks,
    }
}

/// Central dispatch state.
pub struct Dispatcher {
    config: DriverConfig,
    nodes: Mutex<NodeManager>,
    queue: Mutex<JobQueue>,
    /// Every job ever submitted, for the management surface.
    jobs: DashMap<Uuid, Arc<Job>>,
    /// In-flight bundles by id.
    bundles: DashMap<u64, Arc<DispatchBundle>>,
    /// Which bundle a channel is currently carrying.
    bundle_by_channel: DashMap<ChannelId, u64>,
    /// Live channel handles.
    channels: DashMap<ChannelId, ChannelHandle>,
    /// Remote address of each channel.
    addrs: DashMap<ChannelId, SocketAddr>,
    node_by_channel: DashMap<ChannelId, Uuid>,
    channel_by_node: DashMap<Uuid, ChannelId>,
    /// Outstanding management commands awaiting a response.
    pending_commands: DashMap<u64, oneshot::Sender<CommandOutcome>>,
    next_command_id: AtomicU64,
    watcher: Option<ExpirationWatcher>,
    metrics: Arc<DriverMetrics>,
    completion: Arc<CompletionExecutor>,
}

impl Dispatcher {
    /// Create a dispatcher for the given config.
    pub fn new(config: DriverConfig) -> Self {
        let watcher = config
            .dispatch_expiration_ms
            .map(|ms| ExpirationWatcher::new(Duration::from_millis(ms)));
        let nodes = NodeManager::new(config.max_nodes, config.node_timeout_secs);
        Self {
            nodes: Mutex::new(nodes),
            queue: Mutex::new(JobQueue::new()),
            jobs: DashMap::new(),
            bundles: DashMap::new(),
            bundle_by_channel: DashMap::new(),
            channels: DashMap::new(),
            addrs: DashMap::new(),
            node_by_channel: DashMap::new(),
            channel_by_node: DashMap::new(),
            pending_commands: DashMap::new(),
            next_command_id: AtomicU64::new(0),
            watcher,
            metrics: Arc::new(DriverMetrics::new()),
            completion: Arc::new(CompletionExecutor::new()),
            config,
        }
    }

    /// Driver metrics.
    pub fn metrics(&self) -> &DriverMetrics {
        &self.metrics
    }

    // ── Job intake ──────────────────────────────────────────────────────

    /// Accept a job: split into tasks, queue it, and dispatch what can be
    /// dispatched right away.
    pub fn submit_job(
        &self,
        name: impl Into<String>,
        sla: JobSla,
        payloads: Vec<Vec<u8>>,
        graph: Option<TaskGraph>,
    ) -> Result<Arc<Job>> {
        let job = Job::new(
            Uuid::new_v4(),
            name,
            sla,
            payloads,
            graph,
            Arc::clone(&self.completion),
        )?;
        self.jobs.insert(job.uuid(), Arc::clone(&job));
        self.queue.lock().submit(Arc::clone(&job));
        self.metrics.jobs_submitted.inc();
        info!(
            "submitted job {} ({}) with {} tasks",
            job.name(),
            job.uuid(),
            job.initial_task_count()
        );
        self.try_dispatch();
        Ok(job)
    }

    /// Cancel a job. Returns false for unknown or already-terminal jobs.
    pub fn cancel_job(&self, uuid: &Uuid) -> bool {
        let Some(job) = self.jobs.get(uuid).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        if !job.cancel() {
            return false;
        }
        self.metrics.jobs_cancelled.inc();
        let ids: Vec<u64> = self
            .bundles
            .iter()
            .filter(|entry| entry.value().job().uuid() == *uuid)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            self.bundles.remove(&id);
            if let Some(watcher) = &self.watcher {
                watcher.forget(id);
            }
            self.nodes.lock().clear_bundle(id);
        }
        self.bundle_by_channel
            .retain(|_, id| self.bundles.contains_key(id));
        self.finish_job_bookkeeping(&job);
        self.try_dispatch();
        true
    }

    // ── Channel events ──────────────────────────────────────────────────

    /// Process one event coming off the transport.
    pub fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened {
                channel,
                addr,
                peer_value,
                handle,
            } => {
                debug!(
                    "channel {} open from {} (control value {})",
                    channel, addr, peer_value
                );
                self.channels.insert(channel, handle);
                self.addrs.insert(channel, addr);
                self.metrics.connected_channels.inc();
            }
            ChannelEvent::Frame { channel, payload } => match WireMessage::deserialize(&payload) {
                Ok(message) => self.on_message(channel, message),
                Err(e) => {
                    // Fatal for this channel only; dropping our handle
                    // tears it down without touching the others.
                    warn!("undecodable frame on channel {}: {}", channel, e);
                    self.channels.remove(&channel);
                }
            },
            ChannelEvent::Closed { channel, error } => {
                self.on_channel_closed(channel, error.map(|e| e.to_string()));
            }
        }
    }

    fn on_message(&self, channel: ChannelId, message: WireMessage) {
        debug!("channel {}: {}", channel, message.kind());
        match message {
            WireMessage::Hello {
                node_uuid,
                control_port,
                max_tasks,
            } => self.on_hello(channel, node_uuid, control_port, max_tasks),
            WireMessage::JobResults {
                bundle_id, results, ..
            } => self.on_results(channel, bundle_id, results),
            WireMessage::CommandResponse {
                command_id,
                outcome,
            } => {
                if let Some((_, tx)) = self.pending_commands.remove(&command_id) {
                    let _ = tx.send(outcome);
                } else {
                    warn!("unsolicited command response {}", command_id);
                }
            }
            WireMessage::Heartbeat { node_uuid } => {
                self.nodes.lock().record_seen(&node_uuid);
                if let Some(handle) = self.channels.get(&channel) {
                    let _ = handle.send_message(&WireMessage::HeartbeatAck);
                }
            }
            WireMessage::HeartbeatAck => {
                if let Some(node) = self.node_by_channel.get(&channel).map(|e| *e.value()) {
                    self.nodes.lock().record_seen(&node);
                }
            }
            other => {
                warn!(
                    "unexpected {} message on driver channel {}",
                    other.kind(),
                    channel
                );
            }
        }
    }

    fn on_hello(&self, channel: ChannelId, node_uuid: Uuid, control_port: u16, max_tasks: usize) {
        let addr = self
            .addrs
            .get(&channel)
            .map(|e| *e.value())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let info = NodeInfo {
            uuid: node_uuid,
            addr,
            control_port,
            max_tasks,
        };
        if let Err(e) = self.nodes.lock().add_node(info, channel) {
            warn!("rejecting node {} on channel {}: {}", node_uuid, channel, e);
            self.channels.remove(&channel);
            return;
        }
        self.node_by_channel.insert(channel, node_uuid);
        self.channel_by_node.insert(node_uuid, channel);
        self.try_dispatch();
    }

    fn on_results(&self, channel: ChannelId, bundle_id: u64, results: Vec<TaskReturn>) {
        let Some((_, bundle)) = self.bundles.remove(&bundle_id) else {
            warn!("results for unknown bundle {} on channel {}", bundle_id, channel);
            return;
        };
        if let Some(watcher) = &self.watcher {
            watcher.forget(bundle_id);
        }
        self.bundle_by_channel.remove(&channel);
        if let Some(node) = self.node_by_channel.get(&channel).map(|e| *e.value()) {
            self.nodes.lock().record_completion(&node);
        }
        let job = Arc::clone(bundle.job());
        let results = results
            .into_iter()
            .map(|r| BundleResult {
                position: r.position,
                outcome: r.outcome,
            })
            .collect();
        bundle.results_received(results);
        self.finish_job_bookkeeping(&job);
        self.try_dispatch();
    }

    /// A channel loss is never swallowed: the in-flight bundle is
    /// resubmitted and its node marked disconnected.
    fn on_channel_closed(&self, channel: ChannelId, error: Option<String>) {
        debug!(
            "channel {} closed{}",
            channel,
            error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
        );
        self.channels.remove(&channel);
        self.addrs.remove(&channel);
        self.metrics.connected_channels.dec();
        if let Some((_, node)) = self.node_by_channel.remove(&channel) {
            self.channel_by_node.remove(&node);
            self.nodes.lock().mark_disconnected(&node);
            info!("node {} disconnected", node);
        }
        if let Some((_, bundle_id)) = self.bundle_by_channel.remove(&channel) {
            if let Some((_, bundle)) = self.bundles.remove(&bundle_id) {
                if let Some(watcher) = &self.watcher {
                    watcher.forget(bundle_id);
                }
                warn!("channel {} lost mid-dispatch, resubmitting {:?}", channel, bundle);
                let job = Arc::clone(bundle.job());
                bundle.resubmit();
                bundle.results_received(Vec::new());
                self.metrics.bundles_resubmitted.inc();
                self.finish_job_bookkeeping(&job);
            }
        }
        self.try_dispatch();
    }

    // ── Dispatch loop ───────────────────────────────────────────────────

    /// Bind as many queued tasks to free nodes as possible.
    pub fn try_dispatch(&self) {
        while self.dispatch_one() {}
    }

    fn dispatch_one(&self) -> bool {
        let idle = self.nodes.lock().idle_connected();
        for (node_uuid, channel, node_max) in idle {
            let Some(handle) = self.channels.get(&channel).map(|h| h.value().clone()) else {
                continue;
            };
            let jobs = self.queue.lock().dispatchable();
            for job in jobs {
                let sla = job.sla();
                if sla.max_nodes > 0 && job.dispatch_count() >= sla.max_nodes {
                    continue;
                }
                let limit = self
                    .config
                    .max_tasks_per_bundle
                    .min(node_max.max(1))
                    .max(1);
                let bundle = match job.make_bundle(limit) {
                    Ok(Some(bundle)) => bundle,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("could not build bundle for job {}: {}", job.uuid(), e);
                        continue;
                    }
                };
                if self.send_bundle(&job, &bundle, node_uuid, channel, &handle) {
                    return true;
                }
                // The channel failed while sending; stop using this slot.
                break;
            }
        }
        false
    }

    fn send_bundle(
        &self,
        job: &Arc<Job>,
        bundle: &Arc<DispatchBundle>,
        node_uuid: Uuid,
        channel: ChannelId,
        handle: &ChannelHandle,
    ) -> bool {
        let completion = Arc::new(ChannelCompletion {
            bundle_id: bundle.id(),
            job_uuid: job.uuid(),
            handle: handle.clone(),
        });
        if let Err(e) = bundle.dispatch(channel, completion) {
            warn!("could not bind {:?} to channel {}: {}", bundle, channel, e);
            bundle.resubmit();
            bundle.results_received(Vec::new());
            return false;
        }
        if let Err(e) = handle.send_message(&dispatch_message(bundle)) {
            warn!("failed to send {:?} on channel {}: {}", bundle, channel, e);
            bundle.resubmit();
            bundle.results_received(Vec::new());
            return false;
        }
        self.bundles.insert(bundle.id(), Arc::clone(bundle));
        self.bundle_by_channel.insert(channel, bundle.id());
        let _ = self.nodes.lock().record_dispatch(&node_uuid, bundle.id());
        if let Some(watcher) = &self.watcher {
            watcher.register(bundle.id());
        }
        job.update_status(JobStatus::Queued, JobStatus::Executing);
        job.set_submission_status(SubmissionStatus::Executing);
        self.metrics.bundles_dispatched.inc();
        debug!("dispatched {:?} to node {}", bundle, node_uuid);
        true
    }

    /// Retire ended jobs from the queue and count completions.
    fn finish_job_bookkeeping(&self, job: &Arc<Job>) {
        if job.submission_status() == SubmissionStatus::Ended {
            if self.queue.lock().remove(&job.uuid()).is_some() {
                self.metrics.jobs_completed.inc();
            }
        }
    }

    // ── Expiration ──────────────────────────────────────────────────────

    /// Bundle ids whose dispatch deadline has passed.
    pub fn expired_bundles(&self) -> Vec<u64> {
        self.watcher
            .as_ref()
            .map(ExpirationWatcher::expired)
            .unwrap_or_default()
    }

    /// Expire one stalled dispatch: every contained task retries or, past
    /// the SLA bound, is cancelled outright.
    pub fn expire_bundle(&self, bundle_id: u64) {
        let Some((_, bundle)) = self.bundles.remove(&bundle_id) else {
            return;
        };
        warn!("dispatch expired for {:?}", bundle);
        let channel = bundle.channel();
        let job = Arc::clone(bundle.job());
        if let Some(completion) = bundle.completion() {
            completion.cancel();
        }
        bundle.expire();
        bundle.results_received(Vec::new());
        if let Some(channel) = channel {
            self.bundle_by_channel.remove(&channel);
        }
        self.nodes.lock().clear_bundle(bundle_id);
        self.metrics.bundles_expired.inc();
        self.finish_job_bookkeeping(&job);
        self.try_dispatch();
    }

    /// Disconnect nodes that have gone silent.
    pub fn evict_stale_nodes(&self) {
        let stale = self.nodes.lock().evict_stale();
        for node in stale {
            if let Some((_, channel)) = self.channel_by_node.remove(&node) {
                // Dropping our handle lets the channel wind down; the
                // Closed event performs the resubmission bookkeeping.
                self.channels.remove(&channel);
            }
        }
    }

    // ── Management surface ──────────────────────────────────────────────

    /// Every job known to this driver.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Look up one job.
    pub fn job(&self, uuid: &Uuid) -> Option<Arc<Job>> {
        self.jobs.get(uuid).map(|entry| Arc::clone(entry.value()))
    }

    /// In-flight dispatches of a job: bundle id, executing node, task
    /// positions.
    pub fn job_dispatches(&self, uuid: &Uuid) -> Vec<(u64, Option<Uuid>, Vec<u32>)> {
        self.bundles
            .iter()
            .filter(|entry| entry.value().job().uuid() == *uuid)
            .map(|entry| {
                let bundle = entry.value();
                let node = bundle
                    .channel()
                    .and_then(|c| self.node_by_channel.get(&c).map(|e| *e.value()));
                (bundle.id(), node, bundle.positions())
            })
            .collect()
    }

    /// Snapshot of every known node.
    pub fn node_snapshot(&self) -> Vec<crate::nodes::NodeConnection> {
        self.nodes.lock().nodes().cloned().collect()
    }

    /// Forward an opaque command to the selected nodes.
    ///
    /// Returns a per-node result-or-error map; nodes that are unknown,
    /// disconnected or silent past the configured window report an error
    /// string instead of blocking the rest.
    pub async fn forward_command(
        &self,
        selector: NodeSelector,
        payload: Vec<u8>,
    ) -> HashMap<Uuid, std::result::Result<Vec<u8>, String>> {
        let targets: Vec<Uuid> = match selector {
            NodeSelector::All => self.nodes.lock().node_uuids(),
            NodeSelector::Nodes(uuids) => uuids,
        };
        let timeout_ms = self.config.command_timeout_ms;
        let mut results = HashMap::new();
        let mut waiting = Vec::new();
        for node in targets {
            let handle = self
                .channel_by_node
                .get(&node)
                .map(|e| *e.value())
                .and_then(|c| self.channels.get(&c).map(|h| h.value().clone()));
            let Some(handle) = handle else {
                results.insert(node, Err("node not connected".to_string()));
                continue;
            };
            let command_id = self
                .next_command_id
                .fetch_add(1, Ordering::Relaxed)
                .saturating_add(1);
            let (tx, rx) = oneshot::channel();
            self.pending_commands.insert(command_id, tx);
            let message = WireMessage::Command {
                command_id,
                payload: payload.clone(),
            };
            if let Err(e) = handle.send_message(&message) {
                self.pending_commands.remove(&command_id);
                results.insert(node, Err(format!("send failed: {e}")));
                continue;
            }
            waiting.push((node, command_id, rx));
        }
        for (node, command_id, rx) in waiting {
            let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;
            let entry = match outcome {
                Ok(Ok(CommandOutcome::Success(bytes))) => Ok(bytes),
                Ok(Ok(CommandOutcome::Error(message))) => Err(message),
                Ok(Err(_)) => Err("channel closed before response".to_string()),
                Err(_) => {
                    self.pending_commands.remove(&command_id);
                    Err(format!("timed out after {timeout_ms}ms"))
                }
            };
            results.insert(node, entry);
        }
        results
    }
}
