//! Node-bound dispatch bundles.
//!
//! A [`DispatchBundle`] groups a subset of a job's tasks for one round trip
//! to one node. It owns the channel/completion binding for the dispatch,
//! the requeue/expire/cancel flags, and the dependency results the node
//! needs to execute the bundled tasks.

use {
    crate::{
        error::{DispatchError, Result},
        job::Job,
        task::SharedTask,
    },
    log::debug,
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        fmt,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Weak,
        },
    },
    taskgrid_protocol::{header::PARAM_BUNDLE_ID, BundleHeader, DependencyResult, TaskOutcome},
};

/// Count of bundles created in this process; source of unique bundle ids.
static NEXT_BUNDLE_ID: AtomicU64 = AtomicU64::new(0);

/// Completion handle bound to a dispatched bundle.
///
/// Implemented by the driver layer; lets job-level cancellation reach an
/// in-flight dispatch without the model crate knowing about transports.
pub trait DispatchCompletion: Send + Sync {
    /// Cancel the in-flight dispatch.
    fn cancel(&self);
    /// Whether the dispatch already completed.
    fn is_complete(&self) -> bool;
}

/// Result of one task as reported back by a node.
#[derive(Debug, Clone)]
pub struct BundleResult {
    /// Position of the task within the job.
    pub position: u32,
    /// What the node reported.
    pub outcome: TaskOutcome,
}

/// Dependency info captured for a bundle at construction time.
#[derive(Debug, Default, Clone)]
pub struct BundleGraphInfo {
    /// The materialized results of every dependency, deduplicated.
    pub dependencies: Vec<DependencyResult>,
    /// Reverse map: task position → the positions it depends on.
    pub dependencies_map: HashMap<u32, Vec<u32>>,
}

impl BundleGraphInfo {
    /// Number of distinct dependencies carried by the bundle.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }
}

/// Mutable dispatch state, guarded by one mutex.
#[derive(Default)]
struct BundleState {
    cancelled: bool,
    requeued: bool,
    expired: bool,
    offline: bool,
    /// The channel this bundle is currently bound to. `None` while idle.
    channel: Option<u64>,
    /// The in-flight completion handle.
    completion: Option<Arc<dyn DispatchCompletion>>,
}

/// Groups tasks of one job for dispatch to one node.
pub struct DispatchBundle {
    /// Process-wide unique id.
    id: u64,
    /// The owning job.
    job: Arc<Job>,
    /// The header shipped with this bundle.
    header: BundleHeader,
    /// The tasks to be executed by the node.
    tasks: Vec<SharedTask>,
    /// Number of tasks, checked against the header at construction.
    task_count: usize,
    /// Dependency info resolved at construction, if the job has a graph.
    graph_info: Option<BundleGraphInfo>,
    state: Mutex<BundleState>,
    /// Back-reference to the owning `Arc`, for handing this bundle to the
    /// job's dispatch set.
    self_ref: Weak<DispatchBundle>,
}

impl DispatchBundle {
    /// Build a bundle for `tasks` of `job`.
    ///
    /// Fails when the header's declared task count does not match the task
    /// set. Dependencies are resolved eagerly so the dispatch payload can be
    /// assembled without touching the job again.
    pub fn new(job: Arc<Job>, mut header: BundleHeader, tasks: Vec<SharedTask>) -> Result<Arc<Self>> {
        if header.task_count != tasks.len() {
            return Err(DispatchError::TaskCountMismatch {
                declared: header.task_count,
                actual: tasks.len(),
            });
        }
        let id = NEXT_BUNDLE_ID.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        header.set_parameter(PARAM_BUNDLE_ID, id.to_string());
        let positions: Vec<u32> = tasks.iter().map(|t| t.lock().position()).collect();
        let graph_info = job.dependency_info(&positions);
        if let Some(info) = &graph_info {
            debug!("bundle {} carries {} dependencies", id, info.dependency_count());
        }
        Ok(Arc::new_cyclic(|weak| Self {
            id,
            task_count: tasks.len(),
            job,
            header,
            tasks,
            graph_info,
            state: Mutex::new(BundleState::default()),
            self_ref: weak.clone(),
        }))
    }

    /// The unique id of this bundle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owning job.
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// The header shipped with this bundle.
    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// The tasks in this bundle.
    pub fn tasks(&self) -> &[SharedTask] {
        &self.tasks
    }

    /// Number of tasks in this bundle.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Positions of the tasks in this bundle.
    pub fn positions(&self) -> Vec<u32> {
        self.tasks.iter().map(|t| t.lock().position()).collect()
    }

    /// Dependency info resolved at construction, if any.
    pub fn graph_info(&self) -> Option<&BundleGraphInfo> {
        self.graph_info.as_ref()
    }

    // ── Dispatch binding ────────────────────────────────────────────────

    /// Bind this bundle to a channel and completion handle.
    ///
    /// A bundle is bound to at most one channel at a time; dispatching an
    /// already-dispatched, not-yet-completed bundle is rejected.
    pub fn dispatch(&self, channel: u64, completion: Arc<dyn DispatchCompletion>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.channel.is_some() {
                return Err(DispatchError::AlreadyDispatched(self.id));
            }
            state.channel = Some(channel);
            state.completion = Some(completion);
        }
        if let Some(me) = self.self_ref.upgrade() {
            self.job.bundle_dispatched(&me);
        }
        Ok(())
    }

    /// The channel this bundle is currently bound to.
    pub fn channel(&self) -> Option<u64> {
        self.state.lock().channel
    }

    /// The in-flight completion handle, if dispatched.
    pub fn completion(&self) -> Option<Arc<dyn DispatchCompletion>> {
        self.state.lock().completion.clone()
    }

    // ── Outcome paths ───────────────────────────────────────────────────

    /// Deliver per-task results from the node.
    ///
    /// Detaches the channel before notifying the job, so results for a
    /// bundle are considered at most once even under retry; a second
    /// delivery is ignored.
    pub fn results_received(&self, results: Vec<BundleResult>) {
        if !self.detach() {
            debug!("ignoring duplicate results for bundle {}", self.id);
            return;
        }
        self.job.results_received(self, results);
    }

    /// Deliver a communication failure raised while receiving results.
    /// The error is captured on every task; it does not fail the job.
    pub fn results_failed(&self, error: &str) {
        if !self.detach() {
            debug!("ignoring duplicate failure for bundle {}", self.id);
            return;
        }
        self.job.results_failed(self, error);
    }

    /// Detach from the channel and drop the completion handle.
    /// Returns false when the bundle was not attached.
    fn detach(&self) -> bool {
        let mut state = self.state.lock();
        state.completion = None;
        state.channel.take().is_some()
    }

    // ── Retry / expiration / cancellation ───────────────────────────────

    /// Mark this bundle and all its tasks for resubmission.
    /// Broadcast jobs cannot be requeued; this is a no-op for them.
    pub fn resubmit(&self) {
        if self.header.sla.broadcast {
            return;
        }
        let mut state = self.state.lock();
        state.requeued = true;
        for task in &self.tasks {
            task.lock().resubmit();
        }
    }

    /// Expire this dispatch.
    ///
    /// Each task's expiration counter is incremented; a task whose counter
    /// exceeds the job's `max_dispatch_expirations` is cancelled outright,
    /// the others are resubmitted. Bounds retry storms against a node that
    /// never answers. Broadcast jobs cannot expire.
    pub fn expire(&self) {
        if self.header.sla.broadcast {
            return;
        }
        let max = self.job.sla().max_dispatch_expirations;
        let mut state = self.state.lock();
        for task in &self.tasks {
            let mut task = task.lock();
            if task.inc_expiration_count() > max {
                task.cancel();
            } else {
                task.resubmit();
            }
        }
        state.expired = true;
    }

    /// Cancel every task in this bundle. Idempotent. Cancellation at the
    /// bundle level does not remove the bundle from the job; that is the
    /// job's responsibility.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        for task in &self.tasks {
            task.lock().cancel();
        }
    }

    /// Whether this bundle was cancelled. Once set it stays set.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Whether this bundle was marked for resubmission.
    pub fn is_requeued(&self) -> bool {
        self.state.lock().requeued
    }

    /// Whether this dispatch expired.
    pub fn is_expired(&self) -> bool {
        self.state.lock().expired
    }

    /// Whether the target node went offline.
    pub fn is_offline(&self) -> bool {
        self.state.lock().offline
    }

    /// Record that the target node is offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }
}

impl PartialEq for DispatchBundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DispatchBundle {}

impl std::hash::Hash for DispatchBundle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DispatchBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DispatchBundle")
            .field("id", &self.id)
            .field("job", &self.job.uuid())
            .field("name", &self.job.name())
            .field("task_count", &self.task_count)
            .field("cancelled", &state.cancelled)
            .field("requeued", &state.requeued)
            .field("expired", &state.expired)
            .field(
                "dependencies",
                &self.graph_info.as_ref().map_or(0, BundleGraphInfo::dependency_count),
            )
            .field("channel", &state.channel)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{completion::CompletionExecutor, job::Job, test_support::StubCompletion},
        taskgrid_protocol::JobSla,
        uuid::Uuid,
    };

    fn test_job(task_count: usize, sla: JobSla) -> Arc<Job> {
        let payloads = (0..task_count).map(|i| vec![i as u8]).collect();
        Job::new(
            Uuid::new_v4(),
            "test-job",
            sla,
            payloads,
            None,
            Arc::new(CompletionExecutor::new()),
        )
        .unwrap()
    }

    fn bundle_of(job: &Arc<Job>, count: usize) -> Arc<DispatchBundle> {
        job.make_bundle(count).unwrap().expect("bundle available")
    }

    #[test]
    fn test_task_count_mismatch_fails_construction() {
        let job = test_job(3, JobSla::default());
        let mut header = BundleHeader::new(job.uuid(), "test-job", 3, JobSla::default());
        header.task_count = 2; // declared 2, actual 3
        let tasks: Vec<SharedTask> = (0..3).map(|i| crate::task::Task::shared(i, vec![])).collect();
        let result = DispatchBundle::new(job, header, tasks);
        assert!(matches!(
            result,
            Err(DispatchError::TaskCountMismatch {
                declared: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_double_dispatch_rejected() {
        let job = test_job(2, JobSla::default());
        let bundle = bundle_of(&job, 2);
        bundle.dispatch(1, StubCompletion::new()).unwrap();
        let result = bundle.dispatch(2, StubCompletion::new());
        assert!(matches!(result, Err(DispatchError::AlreadyDispatched(_))));
    }

    #[test]
    fn test_redispatch_allowed_after_results() {
        let job = test_job(2, JobSla::default());
        let bundle = bundle_of(&job, 2);
        bundle.dispatch(1, StubCompletion::new()).unwrap();
        bundle.resubmit();
        bundle.results_received(vec![]);
        assert_eq!(bundle.channel(), None);
        bundle.dispatch(2, StubCompletion::new()).unwrap();
        assert_eq!(bundle.channel(), Some(2));
    }

    #[test]
    fn test_results_considered_once() {
        let job = test_job(1, JobSla::default());
        let bundle = bundle_of(&job, 1);
        bundle.dispatch(1, StubCompletion::new()).unwrap();
        let results = vec![BundleResult {
            position: 0,
            outcome: TaskOutcome::Success(vec![1]),
        }];
        bundle.results_received(results.clone());
        // Second delivery is ignored rather than double-counted.
        bundle.results_received(results);
        assert_eq!(job.results().len(), 1);
    }

    #[test]
    fn test_resubmit_marks_bundle_and_tasks() {
        let job = test_job(3, JobSla::default());
        let bundle = bundle_of(&job, 3);
        bundle.resubmit();
        assert!(bundle.is_requeued());
        for task in bundle.tasks() {
            assert_eq!(task.lock().state(), crate::task::TaskState::Resubmit);
        }
    }

    #[test]
    fn test_broadcast_bundles_never_requeue_or_expire() {
        let job = test_job(2, JobSla::broadcast());
        let bundle = bundle_of(&job, 2);
        bundle.resubmit();
        bundle.expire();
        assert!(!bundle.is_requeued());
        assert!(!bundle.is_expired());
        assert_eq!(bundle.tasks()[0].lock().expiration_count(), 0);
    }

    #[test]
    fn test_expiration_bound() {
        let sla = JobSla {
            max_dispatch_expirations: 2,
            ..JobSla::default()
        };
        let job = test_job(1, sla);
        let bundle = bundle_of(&job, 1);

        // N expirations resubmit, the N+1th cancels.
        bundle.expire();
        bundle.expire();
        assert_eq!(
            bundle.tasks()[0].lock().state(),
            crate::task::TaskState::Resubmit
        );
        bundle.expire();
        assert_eq!(
            bundle.tasks()[0].lock().state(),
            crate::task::TaskState::Cancelled
        );
        assert_eq!(bundle.tasks()[0].lock().expiration_count(), 3);
        assert!(bundle.is_expired());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let job = test_job(2, JobSla::default());
        let bundle = bundle_of(&job, 2);
        bundle.cancel();
        bundle.cancel();
        assert!(bundle.is_cancelled());
        for task in bundle.tasks() {
            assert_eq!(task.lock().state(), crate::task::TaskState::Cancelled);
        }
    }

    #[test]
    fn test_bundle_ids_unique_and_in_header() {
        let job = test_job(2, JobSla::default());
        let a = bundle_of(&job, 1);
        let b = bundle_of(&job, 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(
            a.header().parameter(PARAM_BUNDLE_ID),
            Some(a.id().to_string().as_str())
        );
    }
}
