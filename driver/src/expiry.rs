//! Dispatch expiration watcher.
//!
//! A bundle dispatch has no implicit timeout. This watcher is the external
//! observer that converts a stalled dispatch into either a retry or a
//! terminal per-task cancellation: the dispatcher registers every dispatch
//! here, and a periodic sweep drains the deadlines that have passed so the
//! caller can invoke `expire()` on the affected bundles.

use {
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        time::{Duration, Instant},
    },
};

/// Tracks dispatch deadlines by bundle id.
#[derive(Debug)]
pub struct ExpirationWatcher {
    timeout: Duration,
    started: Mutex<HashMap<u64, Instant>>,
}

impl ExpirationWatcher {
    /// Create a watcher expiring dispatches after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Start the clock for a dispatched bundle.
    pub fn register(&self, bundle_id: u64) {
        self.started.lock().insert(bundle_id, Instant::now());
    }

    /// Stop watching a bundle (its results arrived or its channel closed).
    pub fn forget(&self, bundle_id: u64) {
        self.started.lock().remove(&bundle_id);
    }

    /// Number of dispatches currently watched.
    pub fn watched(&self) -> usize {
        self.started.lock().len()
    }

    /// Drain and return the bundles whose deadline has passed.
    pub fn expired(&self) -> Vec<u64> {
        let timeout = self.timeout;
        let mut started = self.started.lock();
        let due: Vec<u64> = started
            .iter()
            .filter(|(_, at)| at.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            started.remove(id);
        }
        due
    }
}
