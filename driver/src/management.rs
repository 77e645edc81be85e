//! Management surface.
//!
//! Operations to list, query and cancel jobs, and to forward an opaque
//! command to a subset of nodes with a per-target result-or-error map. All
//! queries run over the dispatcher's concurrent registries, so they never
//! lock out in-flight dispatching.

use {
    crate::dispatcher::Dispatcher,
    std::{collections::HashMap, net::SocketAddr, sync::Arc},
    taskgrid_dispatch::{JobStatus, SubmissionStatus},
    uuid::Uuid,
};

/// Which nodes a forwarded command targets.
#[derive(Debug, Clone)]
pub enum NodeSelector {
    /// Every known node.
    All,
    /// An explicit set of node uuids.
    Nodes(Vec<Uuid>),
}

/// One in-flight dispatch of a job, as seen by management queries.
#[derive(Debug, Clone)]
pub struct DispatchInfo {
    /// Bundle id.
    pub bundle_id: u64,
    /// The node executing the bundle, if the channel maps to one.
    pub node: Option<Uuid>,
    /// Positions of the tasks in the bundle.
    pub positions: Vec<u32>,
}

/// Management view of one job.
#[derive(Debug, Clone)]
pub struct JobSummary {
    /// Job uuid.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Fan-in marker.
    pub submission_status: SubmissionStatus,
    /// Task count at submission.
    pub initial_task_count: usize,
    /// Tasks currently awaiting dispatch.
    pub queued_tasks: usize,
    /// In-flight dispatches.
    pub dispatches: Vec<DispatchInfo>,
}

/// Management view of one node.
#[derive(Debug, Clone)]
pub struct NodeSummary {
    /// Node uuid.
    pub uuid: Uuid,
    /// Remote address.
    pub addr: SocketAddr,
    /// Whether the connection is believed alive.
    pub is_connected: bool,
    /// Bundles dispatched to this node so far.
    pub bundles_dispatched: u64,
    /// Bundles this node completed.
    pub bundles_completed: u64,
    /// The bundle currently executing, if any.
    pub current_bundle: Option<u64>,
}

/// The management facade handed to admin tooling.
#[derive(Clone)]
pub struct DriverManagement {
    dispatcher: Arc<Dispatcher>,
}

impl DriverManagement {
    /// Wrap a dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Summaries of every job known to the driver.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.dispatcher
            .jobs()
            .into_iter()
            .filter_map(|job| self.summarize(&job.uuid()))
            .collect()
    }

    /// Summary of one job.
    pub fn job_info(&self, uuid: &Uuid) -> Option<JobSummary> {
        self.summarize(uuid)
    }

    /// Cancel a job. A request against an unknown or already-terminal job
    /// is a no-op returning false.
    pub fn cancel_job(&self, uuid: &Uuid) -> bool {
        self.dispatcher.cancel_job(uuid)
    }

    /// Summaries of every known node.
    pub fn list_nodes(&self) -> Vec<NodeSummary> {
        self.dispatcher
            .node_snapshot()
            .into_iter()
            .map(|node| NodeSummary {
                uuid: node.info.uuid,
                addr: node.info.addr,
                is_connected: node.is_connected,
                bundles_dispatched: node.bundles_dispatched,
                bundles_completed: node.bundles_completed,
                current_bundle: node.current_bundle,
            })
            .collect()
    }

    /// Forward an opaque command to the selected nodes, returning a
    /// per-target result-or-error map.
    pub async fn forward_command(
        &self,
        selector: NodeSelector,
        payload: Vec<u8>,
    ) -> HashMap<Uuid, Result<Vec<u8>, String>> {
        self.dispatcher.forward_command(selector, payload).await
    }

    fn summarize(&self, uuid: &Uuid) -> Option<JobSummary> {
        let job = self.dispatcher.job(uuid)?;
        let dispatches = self
            .dispatcher
            .job_dispatches(uuid)
            .into_iter()
            .map(|(bundle_id, node, positions)| DispatchInfo {
                bundle_id,
                node,
                positions,
            })
            .collect();
        Some(JobSummary {
            uuid: job.uuid(),
            name: job.name().to_string(),
            status: job.status(),
            submission_status: job.submission_status(),
            initial_task_count: job.initial_task_count(),
            queued_tasks: job.queued_task_count(),
            dispatches,
        })
    }
}
