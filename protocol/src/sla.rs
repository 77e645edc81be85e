//! Per-job service-level agreement consulted by the dispatch layer.

use serde::{Deserialize, Serialize};

/// Service-level agreement between a job and the driver.
///
/// Travels inside every [`crate::BundleHeader`] so that nodes and the driver
/// agree on the constraints without a side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSla {
    /// Whether the job is suspended. A suspended job is not dispatched and
    /// may still be cancelled even after it started executing.
    pub suspended: bool,

    /// Maximum number of nodes the job may run on concurrently.
    /// `0` means no limit.
    pub max_nodes: usize,

    /// How many times a stalled dispatch of a task may expire before the
    /// task is cancelled outright.
    pub max_dispatch_expirations: u32,

    /// Whether this is a broadcast job. Broadcast dispatches go to every
    /// node and can neither be requeued nor expire.
    pub broadcast: bool,

    /// Whether the driver should persist this job. Persistence itself lives
    /// outside this core; the flag is carried so the outer layer can act.
    pub persistent: bool,

    /// Whether the job is cancelled when the submitting client disconnects.
    pub cancel_upon_client_disconnect: bool,
}

impl Default for JobSla {
    fn default() -> Self {
        Self {
            suspended: false,
            max_nodes: 0,
            max_dispatch_expirations: 3,
            broadcast: false,
            persistent: false,
            cancel_upon_client_disconnect: true,
        }
    }
}

impl JobSla {
    /// SLA for a broadcast job.
    pub fn broadcast() -> Self {
        Self {
            broadcast: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_broadcast() {
        let sla = JobSla::default();
        assert!(!sla.broadcast);
        assert!(!sla.suspended);
        assert_eq!(sla.max_nodes, 0);
    }

    #[test]
    fn test_broadcast_constructor() {
        assert!(JobSla::broadcast().broadcast);
    }
}
