//! Background executor for completion callbacks.
//!
//! "On done" callbacks and job-event listeners run here, off the mutation
//! path, so a slow listener never blocks bundle bookkeeping and callbacks
//! never run while a job lock is held.

use {
    crossbeam_channel::{unbounded, Sender},
    log::warn,
    std::thread::{self, JoinHandle},
};

type Callback = Box<dyn FnOnce() + Send>;

/// One background thread draining a queue of callbacks.
pub struct CompletionExecutor {
    tx: Option<Sender<Callback>>,
    worker: Option<JoinHandle<()>>,
}

impl CompletionExecutor {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Callback>();
        let worker = thread::Builder::new()
            .name("taskgrid-completion".to_string())
            .spawn(move || {
                while let Ok(callback) = rx.recv() {
                    callback();
                }
            })
            .expect("spawn completion worker");
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Enqueue a callback for execution on the worker thread.
    pub fn execute(&self, callback: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            if tx.send(Box::new(callback)).is_err() {
                warn!("completion executor is shut down, dropping callback");
            }
        }
    }
}

impl Default for CompletionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompletionExecutor {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what remains and exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{
            sync::{
                atomic::{AtomicUsize, Ordering},
                Arc,
            },
            thread,
            time::Duration,
        },
    };

    #[test]
    fn test_callbacks_run_off_caller_thread() {
        let executor = CompletionExecutor::new();
        let caller = thread::current().id();
        let (tx, rx) = crossbeam_channel::bounded(1);
        executor.execute(move || {
            let _ = tx.send(thread::current().id());
        });
        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_pending_callbacks_drain_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let executor = CompletionExecutor::new();
            for _ in 0..16 {
                let counter = Arc::clone(&counter);
                executor.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
