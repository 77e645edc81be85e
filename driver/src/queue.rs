//! The job queue.
//!
//! Jobs wait here between submission and dispatch. The queue is FIFO; a job
//! stays queued until it has ended, so resubmitted tasks are picked up by
//! the next free channel without re-queueing machinery.

use {
    log::debug,
    std::collections::{HashMap, VecDeque},
    std::sync::Arc,
    taskgrid_dispatch::{Job, JobStatus},
    uuid::Uuid,
};

/// FIFO queue of jobs keyed by uuid.
#[derive(Default)]
pub struct JobQueue {
    order: VecDeque<Uuid>,
    jobs: HashMap<Uuid, Arc<Job>>,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs in the queue.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Enqueue a freshly submitted job. Moves its status `New → Queued`;
    /// a job that already left `New` is not enqueued twice.
    pub fn submit(&mut self, job: Arc<Job>) -> bool {
        if !job.update_status(JobStatus::New, JobStatus::Queued) {
            return false;
        }
        debug!("queued job {} ({})", job.name(), job.uuid());
        self.order.push_back(job.uuid());
        self.jobs.insert(job.uuid(), job);
        true
    }

    /// Jobs eligible for dispatch right now, in arrival order. Suspended,
    /// pending and cancelled jobs are skipped.
    pub fn dispatchable(&self) -> Vec<Arc<Job>> {
        self.order
            .iter()
            .filter_map(|uuid| self.jobs.get(uuid))
            .filter(|job| !job.is_suspended() && !job.is_pending() && !job.is_cancelled())
            .cloned()
            .collect()
    }

    /// Look up a queued job.
    pub fn get(&self, uuid: &Uuid) -> Option<Arc<Job>> {
        self.jobs.get(uuid).cloned()
    }

    /// Remove a job (normally once it has ended).
    pub fn remove(&mut self, uuid: &Uuid) -> Option<Arc<Job>> {
        self.order.retain(|u| u != uuid);
        self.jobs.remove(uuid)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        taskgrid_dispatch::CompletionExecutor,
        taskgrid_protocol::JobSla,
    };

    fn make_job(sla: JobSla) -> Arc<Job> {
        Job::new(
            Uuid::new_v4(),
            "queued-job",
            sla,
            vec![vec![0u8]],
            None,
            Arc::new(CompletionExecutor::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_submit_moves_status() {
        let mut queue = JobQueue::new();
        let job = make_job(JobSla::default());
        assert!(queue.submit(Arc::clone(&job)));
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(!queue.submit(job), "double submission rejected");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dispatchable_skips_suspended_jobs() {
        let mut queue = JobQueue::new();
        let suspended = make_job(JobSla {
            suspended: true,
            ..JobSla::default()
        });
        let normal = make_job(JobSla::default());
        queue.submit(Arc::clone(&suspended));
        queue.submit(Arc::clone(&normal));

        let dispatchable = queue.dispatchable();
        assert_eq!(dispatchable.len(), 1);
        assert_eq!(dispatchable[0].uuid(), normal.uuid());

        suspended.set_suspended(false);
        assert_eq!(queue.dispatchable().len(), 2);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut queue = JobQueue::new();
        let first = make_job(JobSla::default());
        let second = make_job(JobSla::default());
        queue.submit(Arc::clone(&first));
        queue.submit(Arc::clone(&second));
        let jobs = queue.dispatchable();
        assert_eq!(jobs[0].uuid(), first.uuid());
        assert_eq!(jobs[1].uuid(), second.uuid());
    }

    #[test]
    fn test_remove() {
        let mut queue = JobQueue::new();
        let job = make_job(JobSla::default());
        queue.submit(Arc::clone(&job));
        assert!(queue.remove(&job.uuid()).is_some());
        assert!(queue.is_empty());
        assert!(queue.remove(&job.uuid()).is_none());
    }
}
