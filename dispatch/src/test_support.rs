//! Shared doubles for the crate's tests.

use {
    crate::bundle::DispatchCompletion,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Completion double recording whether it was cancelled.
pub(crate) struct StubCompletion {
    pub cancelled: AtomicBool,
}

impl StubCompletion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
        })
    }
}

impl DispatchCompletion for StubCompletion {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_complete(&self) -> bool {
        false
    }
}
