//! Dispatch-bundle header.
//!
//! A [`BundleHeader`] describes one group of tasks sent to one node in one
//! round trip: the job it belongs to, the number of tasks it declares, the
//! job SLA, and a free-form parameter map used to carry bookkeeping values
//! such as the bundle sequence id.

use {
    crate::sla::JobSla,
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
    uuid::Uuid,
};

/// Parameter key under which the driver stores the bundle id.
pub const PARAM_BUNDLE_ID: &str = "bundle.id";

/// Header of a dispatch bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleHeader {
    /// Uuid of the job this bundle belongs to. Immutable for the lifetime of
    /// the job.
    pub job_uuid: Uuid,
    /// User-defined display name of the job.
    pub name: String,
    /// Number of tasks declared by this header. The dispatch layer verifies
    /// this against the actual task set on bundle construction.
    pub task_count: usize,
    /// Task count of the whole job at submission time.
    pub initial_task_count: usize,
    /// Free-form parameters (bundle sequence id, client hints, ...).
    pub parameters: HashMap<String, String>,
    /// The job SLA consulted by dispatch logic.
    pub sla: JobSla,
}

impl BundleHeader {
    /// Create a header for a freshly submitted job with `task_count` tasks.
    pub fn new(job_uuid: Uuid, name: impl Into<String>, task_count: usize, sla: JobSla) -> Self {
        Self {
            job_uuid,
            name: name.into(),
            task_count,
            initial_task_count: task_count,
            parameters: HashMap::new(),
            sla,
        }
    }

    /// Copy this header for a sub-bundle containing `task_count` tasks.
    pub fn split(&self, task_count: usize) -> Self {
        let mut copy = self.clone();
        copy.task_count = task_count;
        copy
    }

    /// Set a free-form parameter.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// Get a free-form parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_initial_count() {
        let header = BundleHeader::new(Uuid::new_v4(), "job", 10, JobSla::default());
        let sub = header.split(4);
        assert_eq!(sub.task_count, 4);
        assert_eq!(sub.initial_task_count, 10);
        assert_eq!(sub.job_uuid, header.job_uuid);
    }

    #[test]
    fn test_parameters_roundtrip() {
        let mut header = BundleHeader::new(Uuid::new_v4(), "job", 1, JobSla::default());
        header.set_parameter(PARAM_BUNDLE_ID, "42");
        assert_eq!(header.parameter(PARAM_BUNDLE_ID), Some("42"));
        assert_eq!(header.parameter("missing"), None);
    }
}
