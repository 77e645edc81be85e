//! taskgrid Transport Layer
//!
//! Two transport models coexist behind this crate, and the dispatch layer is
//! agnostic to which one backs a given connection:
//!
//! - **Non-blocking channels** — each channel is driven by a finite state
//!   machine ([`state`]) that advances on read/write readiness and never
//!   blocks. A small pool of tasks (one per channel) owns the readiness
//!   loop; state is mutated only by the owning task, and outbound traffic
//!   from other components goes through a thread-safe queue.
//! - **Blocking transport** — one OS thread per connection pumping
//!   `receive → dispatch → send`, with per-call read deadlines that reset
//!   after every call ([`blocking`]).
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]   | `NetConfig` defaults and dev overrides |
//! | [`buffer`]   | Fixed-chunk buffer pool |
//! | [`state`]    | Channel state machine: states, transitions, context |
//! | [`channel`]  | Tokio readiness driver, channel handles and events |
//! | [`server`]   | Listener for inbound node channels |
//! | [`blocking`] | Blocking transport and worker-node pump |
//! | [`error`]    | Crate-wide error enum |

pub mod blocking;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use {
    blocking::{serve_blocking, BlockingTransport},
    buffer::BufferPool,
    channel::{connect, spawn_channel, ChannelEvent, ChannelHandle, HandshakeCallback},
    config::NetConfig,
    error::{NetError, Result},
    server::{NetHandle, NetServer},
    state::{ChannelId, ChannelState, Interest, Transition, TransitionTable},
};
