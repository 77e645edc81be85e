//! taskgrid Driver
//!
//! The coordinator of the grid: accepts jobs from clients, splits each job
//! into dispatch bundles, ships the bundles to worker nodes over persistent
//! channels, and reassembles the results under the job SLA.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────┐
//!  │  Dispatcher                                      │
//!  │  • JobQueue (FIFO, suspended/pending skipped)    │
//!  │  • NodeManager (liveness, free-slot tracking)    │
//!  │  • bundle/channel registries (dashmap)           │
//!  │  • ExpirationWatcher (stalled-dispatch bound)    │
//!  └──────┬───────────────────────────────┬───────────┘
//!         │ ChannelEvent stream           │ JobDispatch / CancelBundle
//!  ┌──────▼───────────────────────────────▼───────────┐
//!  │  taskgrid-net: channel state machines over TCP   │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`service`]    | `Driver` startup, event and sweep loops |
//! | [`dispatcher`] | Binding queued jobs to free node channels |
//! | [`nodes`]      | Worker-node registry and liveness |
//! | [`queue`]      | FIFO job queue |
//! | [`expiry`]     | Dispatch expiration watcher |
//! | [`management`] | List/cancel/query jobs, forward node commands |
//! | [`metrics`]    | Driver counters and gauges |
//! | [`config`]     | `DriverConfig` defaults and dev overrides |
//! | [`error`]      | Crate-wide error enum |

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod expiry;
pub mod management;
pub mod metrics;
pub mod nodes;
pub mod queue;
pub mod service;

pub use {
    config::DriverConfig,
    dispatcher::Dispatcher,
    error::{DriverError, Result},
    expiry::ExpirationWatcher,
    management::{DispatchInfo, DriverManagement, JobSummary, NodeSelector, NodeSummary},
    metrics::DriverMetrics,
    nodes::{NodeConnection, NodeInfo, NodeManager},
    queue::JobQueue,
    service::{Driver, DriverHandle},
};
