//! taskgrid Wire Protocol
//!
//! This crate defines everything the driver and its worker nodes agree on:
//!
//! - **Wire messages** — every frame on a taskgrid channel is a
//!   length-prefixed bincode encoding of [`WireMessage`].
//! - **Bundle headers** — [`BundleHeader`] describes one dispatch bundle:
//!   which job it belongs to, how many tasks it declares, its SLA and a
//!   free-form parameter map for bookkeeping.
//! - **Task graphs** — [`TaskGraph`] captures "depends on" relationships
//!   between task positions and tracks which positions become dispatchable
//!   as their dependencies complete.
//!
//! Task payloads themselves are opaque byte blobs; the driver never decodes
//! them. Only headers and control values are understood at this layer.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`message`] | Wire types, bincode ser/de, framing helpers |
//! | [`header`]  | Dispatch-bundle header and parameter map |
//! | [`sla`]     | Per-job service-level agreement fields |
//! | [`graph`]   | Task dependency DAG with done-propagation |
//! | [`error`]   | Crate-wide error enum |

pub mod error;
pub mod graph;
pub mod header;
pub mod message;
pub mod sla;

pub use {
    error::{ProtocolError, Result},
    graph::TaskGraph,
    header::BundleHeader,
    message::{CommandOutcome, DependencyResult, TaskData, TaskOutcome, TaskReturn, WireMessage},
    sla::JobSla,
};
