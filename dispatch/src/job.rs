//! Job lifecycle and completion tracking.
//!
//! A [`Job`] owns the authoritative status of one submitted unit of work and
//! fans bundle completions back into job completion. Two state machines
//! coexist:
//!
//! - [`JobStatus`] — the externally visible lifecycle
//!   (`New → Queued → Executing → {Complete | Cancelled}`), moved only by
//!   compare-and-set so cancellation races with normal progression resolve
//!   deterministically. A job never regresses out of `Cancelled`.
//! - [`SubmissionStatus`] — a simpler marker that flips to `Ended` exactly
//!   once, when the dispatch set and the queued-task set are both empty.
//!   Reaching `Ended` hands the registered on-done callbacks to a background
//!   executor, never running them under the job lock.
//!
//! All task/bundle bookkeeping is guarded by one per-job mutex.

use {
    crate::{
        bundle::{BundleGraphInfo, BundleResult, DispatchBundle},
        completion::CompletionExecutor,
        error::Result,
        task::{SharedTask, Task, TaskCompletion, TaskState},
    },
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::{
        collections::{BTreeMap, HashMap},
        sync::{
            atomic::{AtomicBool, AtomicU8, Ordering},
            Arc, Weak,
        },
    },
    taskgrid_protocol::{BundleHeader, DependencyResult, JobSla, TaskGraph, TaskOutcome},
    uuid::Uuid,
};

// ── Status machines ─────────────────────────────────────────────────────────

/// Externally visible job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobStatus {
    /// Just created, not yet queued.
    New = 0,
    /// Waiting in the job queue.
    Queued = 1,
    /// At least one bundle has been dispatched.
    Executing = 2,
    /// All tasks reported back.
    Complete = 3,
    /// The job was cancelled. Terminal; never regressed out of.
    Cancelled = 4,
}

/// The last status in which a cancellation request is honoured for a
/// non-suspended job. Once the status has progressed *past* this point the
/// job is terminal and a cancel request is a no-op.
pub const LAST_CANCELLABLE_STATUS: JobStatus = JobStatus::Executing;

impl JobStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Queued,
            2 => Self::Executing,
            3 => Self::Complete,
            _ => Self::Cancelled,
        }
    }
}

/// Fan-in marker tracking whether all dispatch bundles reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// The job was accepted by the driver.
    Submitted,
    /// Bundles are in flight.
    Executing,
    /// Every task has an outcome.
    Complete,
    /// A bundle failed while tasks are still outstanding.
    Failed,
    /// Dispatch set and queued set are both empty. Terminal; fires the
    /// on-done callbacks exactly once.
    Ended,
}

/// Receives job lifecycle notifications.
///
/// Implementations must be quick; `job_updated` fires on the mutating
/// thread. Heavy work belongs on the completion executor.
pub trait JobEventListener: Send + Sync {
    /// An SLA-affecting job attribute actually changed.
    fn job_updated(&self, _job: &Job) {}
    /// A bundle was dispatched to a node.
    fn job_dispatched(&self, _job: &Job, _bundle: &DispatchBundle) {}
    /// A bundle reported back.
    fn job_returned(&self, _job: &Job, _bundle: &DispatchBundle) {}
}

// ── Job ─────────────────────────────────────────────────────────────────────

type OnDone = Box<dyn FnOnce() + Send>;

/// Bookkeeping guarded by the per-job lock.
struct JobInner {
    /// Every task of the job, in position order. Never shrinks.
    all: BTreeMap<u32, SharedTask>,
    /// Tasks awaiting (re-)dispatch.
    queued: BTreeMap<u32, SharedTask>,
    /// Dependency graph, if the job declared one.
    graph: Option<TaskGraph>,
    /// Materialized results kept for dependants.
    dep_results: HashMap<u32, Vec<u8>>,
    /// Outstanding dispatches keyed by bundle id.
    dispatch_set: HashMap<u64, Arc<DispatchBundle>>,
}

/// One submitted unit of work.
pub struct Job {
    /// Immutable identity.
    uuid: Uuid,
    /// User-defined display name.
    name: String,
    /// Free-form metadata supplied at submission.
    metadata: HashMap<String, String>,
    /// Live SLA; setters fire `job_updated` only on actual change.
    sla: Mutex<JobSla>,
    /// Waiting for its scheduled start time.
    pending: AtomicBool,
    /// [`JobStatus`] storage; moved only by compare-and-set.
    status: AtomicU8,
    submission_status: Mutex<SubmissionStatus>,
    inner: Mutex<JobInner>,
    on_done: Mutex<Vec<OnDone>>,
    listener: Mutex<Option<Arc<dyn JobEventListener>>>,
    completion: Arc<CompletionExecutor>,
    initial_task_count: usize,
    /// Back-reference to the owning `Arc`, for handing the job to the
    /// bundles it creates.
    self_ref: Weak<Job>,
}

impl Job {
    /// Create a job from opaque task payloads, one task per payload in
    /// position order.
    pub fn new(
        uuid: Uuid,
        name: impl Into<String>,
        sla: JobSla,
        payloads: Vec<Vec<u8>>,
        graph: Option<TaskGraph>,
        completion: Arc<CompletionExecutor>,
    ) -> Result<Arc<Self>> {
        let mut all = BTreeMap::new();
        for (position, payload) in payloads.into_iter().enumerate() {
            let position = position as u32;
            all.insert(position, Task::shared(position, payload));
        }
        let queued = all.clone();
        let initial_task_count = all.len();
        debug!("creating job {} with {} tasks", uuid, initial_task_count);
        Ok(Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            uuid,
            name: name.into(),
            metadata: HashMap::new(),
            sla: Mutex::new(sla),
            pending: AtomicBool::new(false),
            status: AtomicU8::new(JobStatus::New as u8),
            submission_status: Mutex::new(SubmissionStatus::Submitted),
            inner: Mutex::new(JobInner {
                all,
                queued,
                graph,
                dep_results: HashMap::new(),
                dispatch_set: HashMap::new(),
            }),
            on_done: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            completion,
            initial_task_count,
        }))
    }

    // ── Identity and attributes ─────────────────────────────────────────

    /// The immutable job uuid.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form metadata.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Snapshot of the current SLA.
    pub fn sla(&self) -> JobSla {
        self.sla.lock().clone()
    }

    /// Task count at submission time.
    pub fn initial_task_count(&self) -> usize {
        self.initial_task_count
    }

    /// Number of tasks currently awaiting dispatch.
    pub fn queued_task_count(&self) -> usize {
        self.inner.lock().queued.len()
    }

    /// Number of dispatch bundles currently in flight.
    pub fn dispatch_count(&self) -> usize {
        self.inner.lock().dispatch_set.len()
    }

    /// Install the lifecycle listener.
    pub fn set_listener(&self, listener: Arc<dyn JobEventListener>) {
        *self.listener.lock() = Some(listener);
    }

    // ── Status ──────────────────────────────────────────────────────────

    /// Current job status.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move the status from `expect` to `new_status` if it still holds.
    pub fn update_status(&self, expect: JobStatus, new_status: JobStatus) -> bool {
        self.status
            .compare_exchange(
                expect as u8,
                new_status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    /// Current submission status.
    pub fn submission_status(&self) -> SubmissionStatus {
        *self.submission_status.lock()
    }

    /// Whether the job is suspended.
    pub fn is_suspended(&self) -> bool {
        self.sla.lock().suspended
    }

    /// Whether the job waits for its scheduled start.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    // ── Change-detecting setters ────────────────────────────────────────

    /// Suspend or resume the job.
    pub fn set_suspended(&self, suspended: bool) {
        {
            let mut sla = self.sla.lock();
            if sla.suspended == suspended {
                return;
            }
            sla.suspended = suspended;
        }
        self.fire_job_updated();
    }

    /// Set the maximum number of nodes. Zero is ignored.
    pub fn set_max_nodes(&self, max_nodes: usize) {
        if max_nodes == 0 {
            return;
        }
        {
            let mut sla = self.sla.lock();
            if sla.max_nodes == max_nodes {
                return;
            }
            sla.max_nodes = max_nodes;
        }
        self.fire_job_updated();
    }

    /// Set the pending indicator.
    pub fn set_pending(&self, pending: bool) {
        if self.pending.swap(pending, Ordering::AcqRel) == pending {
            return;
        }
        self.fire_job_updated();
    }

    // ── Dispatch-side operations ────────────────────────────────────────

    /// Group up to `max_tasks` dispatchable tasks into a bundle.
    ///
    /// A task with declared dependencies is dispatchable only once every
    /// dependency has produced a result. Returns `Ok(None)` when nothing can
    /// be dispatched right now.
    pub fn make_bundle(&self, max_tasks: usize) -> Result<Option<Arc<DispatchBundle>>> {
        let Some(me) = self.self_ref.upgrade() else {
            return Ok(None);
        };
        let (header, tasks) = {
            let mut inner = self.inner.lock();
            let limit = max_tasks.max(1);
            let selected: Vec<u32> = inner
                .queued
                .iter()
                .filter(|(pos, task)| {
                    let gated = match inner.graph.as_ref() {
                        Some(graph) if graph.contains(**pos) => graph.is_available(**pos),
                        _ => true,
                    };
                    gated && task.lock().state() == TaskState::Pending
                })
                .map(|(pos, _)| *pos)
                .take(limit)
                .collect();
            if selected.is_empty() {
                return Ok(None);
            }
            let tasks: Vec<SharedTask> = selected
                .iter()
                .filter_map(|pos| inner.queued.remove(pos))
                .collect();
            let sla = self.sla.lock().clone();
            let header = BundleHeader::new(self.uuid, self.name.clone(), self.initial_task_count, sla)
                .split(tasks.len());
            (header, tasks)
        };
        let bundle = DispatchBundle::new(me, header, tasks)?;
        Ok(Some(bundle))
    }

    /// Collect the materialized dependency results the given task positions
    /// need, plus the reverse `position → [dependency positions]` map.
    /// `None` when the job has no graph or nothing is attached.
    pub(crate) fn dependency_info(&self, positions: &[u32]) -> Option<BundleGraphInfo> {
        let inner = self.inner.lock();
        let graph = inner.graph.as_ref()?;
        let mut collected: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        let mut dependencies_map: HashMap<u32, Vec<u32>> = HashMap::new();
        for pos in positions {
            for dep in graph.dependencies_of(*pos) {
                if let Some(result) = inner.dep_results.get(dep) {
                    collected.insert(*dep, result.clone());
                    dependencies_map.entry(*pos).or_default().push(*dep);
                }
            }
        }
        if collected.is_empty() {
            return None;
        }
        Some(BundleGraphInfo {
            dependencies: collected
                .into_iter()
                .map(|(position, result)| DependencyResult { position, result })
                .collect(),
            dependencies_map,
        })
    }

    /// Record that a bundle of this job was dispatched to a node.
    pub(crate) fn bundle_dispatched(&self, bundle: &Arc<DispatchBundle>) {
        {
            let mut inner = self.inner.lock();
            inner.dispatch_set.insert(bundle.id(), Arc::clone(bundle));
        }
        debug!("job {}: dispatched {:?}", self.uuid, bundle);
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.job_dispatched(self, bundle);
        }
    }

    // ── Result fan-in ───────────────────────────────────────────────────

    /// Fold per-task outcomes of a returned bundle back into the job.
    ///
    /// Resubmit-marked tasks return to the queued set; cancelled tasks stay
    /// terminal; everything else records its outcome, feeds the dependency
    /// store and unblocks dependants.
    pub(crate) fn results_received(&self, bundle: &DispatchBundle, results: Vec<BundleResult>) {
        debug!(
            "job {}: received {} results from {:?}",
            self.uuid,
            results.len(),
            bundle
        );
        let mut by_position: HashMap<u32, TaskOutcome> = results
            .into_iter()
            .map(|r| (r.position, r.outcome))
            .collect();
        {
            let mut inner = self.inner.lock();
            for task in bundle.tasks() {
                let mut t = task.lock();
                let position = t.position();
                match t.state() {
                    TaskState::Resubmit => {
                        t.requeued();
                        inner.queued.insert(position, Arc::clone(task));
                    }
                    TaskState::Cancelled => {
                        if let Some(graph) = inner.graph.as_mut() {
                            graph.node_done(position);
                        }
                    }
                    _ => match by_position.remove(&position) {
                        Some(TaskOutcome::Success(result)) => {
                            let feeds_dependants = inner
                                .graph
                                .as_ref()
                                .is_some_and(|g| g.has_dependants(position));
                            if feeds_dependants {
                                inner.dep_results.insert(position, result.clone());
                            }
                            t.result_received(result);
                            if let Some(graph) = inner.graph.as_mut() {
                                graph.node_done(position);
                            }
                        }
                        Some(TaskOutcome::Error(message)) => {
                            t.error_received(message);
                            if let Some(graph) = inner.graph.as_mut() {
                                graph.node_done(position);
                            }
                        }
                        None => {
                            // The node returned nothing for this task;
                            // put it back in the queue.
                            t.resubmit();
                            t.requeued();
                            inner.queued.insert(position, Arc::clone(task));
                        }
                    },
                }
            }
            inner.dispatch_set.remove(&bundle.id());
        }
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.job_returned(self, bundle);
        }
        self.completion_bookkeeping(false);
    }

    /// A bundle failed at the communication level. The error is captured on
    /// every task that has no other outcome; the job itself carries on.
    pub(crate) fn results_failed(&self, bundle: &DispatchBundle, error: &str) {
        warn!("job {}: bundle error '{}' from {:?}", self.uuid, error, bundle);
        {
            let mut inner = self.inner.lock();
            for task in bundle.tasks() {
                let mut t = task.lock();
                let position = t.position();
                if t.state() == TaskState::Resubmit {
                    t.requeued();
                    inner.queued.insert(position, Arc::clone(task));
                    continue;
                }
                t.error_received(error);
                if let Some(graph) = inner.graph.as_mut() {
                    graph.node_done(position);
                }
            }
            inner.dispatch_set.remove(&bundle.id());
        }
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.job_returned(self, bundle);
        }
        self.completion_bookkeeping(true);
    }

    /// Roll the submission/status machines forward after a bundle returned.
    fn completion_bookkeeping(&self, had_error: bool) {
        let has_pending = {
            let inner = self.inner.lock();
            !inner.queued.is_empty() || !inner.dispatch_set.is_empty()
        };
        if has_pending {
            if had_error {
                self.set_submission_status(SubmissionStatus::Failed);
            }
        } else {
            self.set_submission_status(SubmissionStatus::Complete);
            self.update_status(JobStatus::Executing, JobStatus::Complete);
            self.set_submission_status(SubmissionStatus::Ended);
        }
    }

    // ── Cancellation ────────────────────────────────────────────────────

    /// Cancel this job.
    ///
    /// Rejected once the status has progressed past
    /// [`LAST_CANCELLABLE_STATUS`] unless the job is suspended. The write is
    /// a compare-and-set from the observed status, so a concurrent terminal
    /// transition wins the race. A cancel request against a job that is
    /// already terminal is a no-op returning `false`.
    pub fn cancel(&self) -> bool {
        let current = self.status();
        if current == JobStatus::Cancelled {
            return false;
        }
        if !self.is_suspended() && current > LAST_CANCELLABLE_STATUS {
            return false;
        }
        if !self.update_status(current, JobStatus::Cancelled) {
            return false;
        }
        info!("cancelling job {} ({})", self.name, self.uuid);
        self.cancel_dispatches();
        self.cancel_queued_tasks();
        self.completion_bookkeeping(false);
        true
    }

    /// Cancel every in-flight dispatch and reclaim its bundle.
    fn cancel_dispatches(&self) {
        let bundles: Vec<Arc<DispatchBundle>> = {
            let inner = self.inner.lock();
            inner.dispatch_set.values().cloned().collect()
        };
        debug!("cancelling {} dispatches for job {}", bundles.len(), self.uuid);
        for bundle in bundles {
            if let Some(completion) = bundle.completion() {
                if !completion.is_complete() {
                    completion.cancel();
                }
            }
            bundle.cancel();
            bundle.results_received(Vec::new());
        }
    }

    /// Cancel tasks still waiting in the queue.
    fn cancel_queued_tasks(&self) {
        let mut inner = self.inner.lock();
        let positions: Vec<u32> = inner.queued.keys().copied().collect();
        for position in positions {
            if let Some(task) = inner.queued.remove(&position) {
                task.lock().cancel();
            }
            if let Some(graph) = inner.graph.as_mut() {
                graph.node_done(position);
            }
        }
    }

    // ── Submission status and completion callbacks ──────────────────────

    /// Set the submission status if it differs. `Ended` is terminal and
    /// fires the on-done callbacks exactly once, on the background executor.
    pub fn set_submission_status(&self, new_status: SubmissionStatus) {
        let ended = {
            let mut current = self.submission_status.lock();
            if *current == new_status || *current == SubmissionStatus::Ended {
                return;
            }
            debug!(
                "job {}: submission status {:?} -> {:?}",
                self.uuid, *current, new_status
            );
            *current = new_status;
            new_status == SubmissionStatus::Ended
        };
        if ended {
            self.done();
        }
    }

    /// Register a callback to run when the job reaches `Ended`.
    pub fn add_on_done(&self, callback: impl FnOnce() + Send + 'static) {
        self.on_done.lock().push(Box::new(callback));
    }

    /// Hand the on-done callbacks to the background executor.
    fn done(&self) {
        let callbacks: Vec<OnDone> = std::mem::take(&mut *self.on_done.lock());
        if callbacks.is_empty() {
            return;
        }
        self.completion.execute(move || {
            for callback in callbacks {
                callback();
            }
        });
    }

    fn fire_job_updated(&self) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.job_updated(self);
        }
    }

    // ── Results surface ─────────────────────────────────────────────────

    /// Per-task outcome in position order: result, captured error,
    /// cancellation, or incomplete.
    pub fn results(&self) -> Vec<(u32, TaskCompletion)> {
        let inner = self.inner.lock();
        inner
            .all
            .iter()
            .map(|(position, task)| (*position, task.lock().completion()))
            .collect()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("submission_status", &self.submission_status())
            .field("initial_task_count", &self.initial_task_count)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
