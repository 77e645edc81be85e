//! One unit of remote execution within a job.

use {parking_lot::Mutex, std::sync::Arc};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to be dispatched (or re-dispatched).
    Pending,
    /// Marked for resubmission after a failed or expired dispatch.
    Resubmit,
    /// A result was received from a node.
    Result,
    /// The task raised an error while executing remotely. The error lives on
    /// the task; it does not fail the bundle or the job.
    Error,
    /// The task was cancelled. Terminal.
    Cancelled,
}

/// Snapshot of a task's final (or current) outcome, as surfaced in the
/// job-level result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCompletion {
    /// The task completed with a serialized result.
    Success(Vec<u8>),
    /// The task raised an error while executing remotely.
    Error(String),
    /// The task was cancelled (explicitly or by expiration exhaustion).
    Cancelled,
    /// The task has not finished yet.
    Incomplete,
}

/// A task is shared between its job and the bundles that carry it.
pub type SharedTask = Arc<Mutex<Task>>;

/// The smallest unit of remote execution, identified by its position within
/// the owning job.
#[derive(Debug)]
pub struct Task {
    /// Position within the job. Unique and stable.
    position: u32,
    /// Opaque serialized task body.
    payload: Vec<u8>,
    state: TaskState,
    result: Option<Vec<u8>>,
    error: Option<String>,
    /// How many dispatches of this task have expired.
    expiration_count: u32,
}

impl Task {
    /// Create a pending task.
    pub fn new(position: u32, payload: Vec<u8>) -> Self {
        Self {
            position,
            payload,
            state: TaskState::Pending,
            result: None,
            error: None,
            expiration_count: 0,
        }
    }

    /// Create a pending task behind its shared handle.
    pub fn shared(position: u32, payload: Vec<u8>) -> SharedTask {
        Arc::new(Mutex::new(Self::new(position, payload)))
    }

    /// Position within the job.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// The opaque task body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Whether the task reached a terminal state.
    pub fn is_done(&self) -> bool {
        matches!(
            self.state,
            TaskState::Result | TaskState::Error | TaskState::Cancelled
        )
    }

    /// The received result, if any.
    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    /// The captured execution error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of expired dispatches so far.
    pub fn expiration_count(&self) -> u32 {
        self.expiration_count
    }

    /// Record a result received from a node. Ignored once cancelled.
    pub fn result_received(&mut self, result: Vec<u8>) {
        if self.state == TaskState::Cancelled {
            return;
        }
        self.result = Some(result);
        self.state = TaskState::Result;
    }

    /// Capture an error raised while the task executed remotely.
    /// Ignored once cancelled.
    pub fn error_received(&mut self, error: impl Into<String>) {
        if self.state == TaskState::Cancelled {
            return;
        }
        self.error = Some(error.into());
        self.state = TaskState::Error;
    }

    /// Mark the task for resubmission. No-op once the task is done.
    pub fn resubmit(&mut self) {
        if !self.is_done() {
            self.state = TaskState::Resubmit;
        }
    }

    /// Return a resubmit-marked task to the pending state.
    pub fn requeued(&mut self) {
        if self.state == TaskState::Resubmit {
            self.state = TaskState::Pending;
        }
    }

    /// Cancel the task. Idempotent; a task that already produced a result
    /// keeps it.
    pub fn cancel(&mut self) {
        if self.state != TaskState::Result {
            self.state = TaskState::Cancelled;
        }
    }

    /// Increment and return the expiration counter.
    pub fn inc_expiration_count(&mut self) -> u32 {
        self.expiration_count = self.expiration_count.saturating_add(1);
        self.expiration_count
    }

    /// This task's outcome as surfaced in the job result set.
    pub fn completion(&self) -> TaskCompletion {
        match self.state {
            TaskState::Result => {
                TaskCompletion::Success(self.result.clone().unwrap_or_default())
            }
            TaskState::Error => {
                TaskCompletion::Error(self.error.clone().unwrap_or_default())
            }
            TaskState::Cancelled => TaskCompletion::Cancelled,
            TaskState::Pending | TaskState::Resubmit => TaskCompletion::Incomplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_is_terminal() {
        let mut task = Task::new(0, vec![1]);
        task.result_received(vec![9]);
        assert_eq!(task.state(), TaskState::Result);
        task.resubmit();
        assert_eq!(task.state(), TaskState::Result, "done tasks never resubmit");
    }

    #[test]
    fn test_cancel_wins_over_late_result() {
        let mut task = Task::new(0, vec![]);
        task.cancel();
        task.result_received(vec![9]);
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(task.completion(), TaskCompletion::Cancelled);
    }

    #[test]
    fn test_cancel_keeps_existing_result() {
        let mut task = Task::new(0, vec![]);
        task.result_received(vec![7]);
        task.cancel();
        assert_eq!(task.state(), TaskState::Result);
    }

    #[test]
    fn test_resubmit_requeue_cycle() {
        let mut task = Task::new(3, vec![]);
        task.resubmit();
        assert_eq!(task.state(), TaskState::Resubmit);
        task.requeued();
        assert_eq!(task.state(), TaskState::Pending);
    }

    #[test]
    fn test_error_is_captured_not_thrown() {
        let mut task = Task::new(0, vec![]);
        task.error_received("division by zero");
        assert!(task.is_done());
        assert_eq!(
            task.completion(),
            TaskCompletion::Error("division by zero".into())
        );
    }

    #[test]
    fn test_expiration_counter() {
        let mut task = Task::new(0, vec![]);
        assert_eq!(task.inc_expiration_count(), 1);
        assert_eq!(task.inc_expiration_count(), 2);
        assert_eq!(task.expiration_count(), 2);
    }
}
