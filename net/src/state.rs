//! The per-channel protocol state machine.
//!
//! Drives exactly one non-blocking channel through a bounded set of named
//! states, never blocking the driving thread. The machine is deterministic:
//! given the same sequence of readiness notifications and bytes, it always
//! produces the same transitions. All socket I/O is abstracted behind the
//! [`ChannelIo`] trait; this module is pure state-machine logic.
//!
//! ## States
//!
//! - `Idle` — no pending I/O; returns to itself.
//! - `SendingHandshake` / `ReceivingHandshake` — protocol bootstrap: the two
//!   peers exchange a single raw 4-byte little-endian control value (the
//!   peer's control port) before the channel is handed off to steady state.
//! - `SendingOrReceiving` — decision state: picks sending if output is
//!   pending, otherwise attempts a receive, otherwise stays put.
//! - `Receiving` — accumulate bytes into a pooled buffer until a full
//!   length-prefixed frame is assembled; partial reads repeat the state.
//! - `Sending` — drain the queued outbound frames; partial writes repeat the
//!   state.
//!
//! Partial reads and writes are expected conditions and never error. Only
//! protocol violations and disconnection produce errors, and those close the
//! channel.

use {
    crate::{
        buffer::BufferPool,
        error::{NetError, Result},
    },
    bitflags::bitflags,
    std::{
        collections::{HashMap, VecDeque},
        io,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

/// Process-wide channel id counter.
static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one channel for logging and bundle-to-channel keying.
pub type ChannelId = u64;

/// Allocate a fresh channel id.
pub fn next_channel_id() -> ChannelId {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed).saturating_add(1)
}

bitflags! {
    /// The I/O readiness a channel is currently interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        /// Interested in read readiness.
        const READ = 0b01;
        /// Interested in write readiness.
        const WRITE = 0b10;
    }
}

/// The named states a channel can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No pending I/O.
    Idle,
    /// Writing our 4-byte control value to the peer.
    SendingHandshake,
    /// Reading the peer's 4-byte control value.
    ReceivingHandshake,
    /// Steady-state decision point between sending and receiving.
    SendingOrReceiving,
    /// Assembling an inbound frame.
    Receiving,
    /// Draining outbound frames.
    Sending,
}

/// The named transitions the machine can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Remain idle.
    ToIdle,
    /// Enter (or stay in) `SendingHandshake`.
    ToSendingHandshake,
    /// Enter (or stay in) `ReceivingHandshake`.
    ToReceivingHandshake,
    /// Enter (or stay in) the steady-state decision point.
    ToSendingOrReceiving,
    /// Enter (or stay in) `Receiving`.
    ToReceiving,
    /// Enter (or stay in) `Sending`.
    ToSending,
}

/// Maps every transition to its target state and interest set.
///
/// Built once per process and immutable afterwards.
#[derive(Debug)]
pub struct TransitionTable {
    map: HashMap<Transition, (ChannelState, Interest)>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionTable {
    /// Build the transition table.
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(Transition::ToIdle, (ChannelState::Idle, Interest::empty()));
        map.insert(
            Transition::ToSendingHandshake,
            (ChannelState::SendingHandshake, Interest::WRITE),
        );
        map.insert(
            Transition::ToReceivingHandshake,
            (ChannelState::ReceivingHandshake, Interest::READ),
        );
        map.insert(
            Transition::ToSendingOrReceiving,
            (ChannelState::SendingOrReceiving, Interest::READ.union(Interest::WRITE)),
        );
        map.insert(Transition::ToReceiving, (ChannelState::Receiving, Interest::READ));
        map.insert(Transition::ToSending, (ChannelState::Sending, Interest::WRITE));
        Self { map }
    }

    /// The `(state, interest)` pair a transition leads to.
    pub fn target(&self, transition: Transition) -> (ChannelState, Interest) {
        // The table is total over the enum; a miss is a construction bug.
        self.map[&transition]
    }
}

/// Outcome of a non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// The operation would block; try again on the next readiness event.
    WouldBlock,
    /// The peer closed its end of the connection.
    Eof,
}

/// Outcome of a non-blocking write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `n` bytes were written.
    Wrote(usize),
    /// The operation would block; try again on the next readiness event.
    WouldBlock,
}

/// Non-blocking byte I/O as seen by the state machine.
///
/// Implemented over a real socket by the channel driver and over scripted
/// buffers in tests.
pub trait ChannelIo {
    /// Attempt to read into `buf` without blocking.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;
    /// Attempt to write `buf` without blocking.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome>;
}

/// Role of this end of the channel, deciding who speaks first in the
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// We initiated the connection: send our control value, then read the
    /// peer's.
    Connector,
    /// We accepted the connection: read the peer's control value, then send
    /// ours.
    Acceptor,
}

/// Per-channel mutable state.
///
/// Owned exclusively by the task driving the channel for the lifetime of the
/// connection. Other components enqueue outbound frames through a
/// thread-safe queue, never by touching this struct.
pub struct ChannelContext {
    /// Unique channel id.
    id: ChannelId,
    /// Current protocol state.
    state: ChannelState,
    /// Scratch chunk for reads, drawn from the pool.
    chunk: Vec<u8>,
    /// Accumulated unparsed inbound bytes, drawn from the pool.
    acc: Vec<u8>,
    /// Fully assembled inbound frame payloads (length prefix stripped).
    received: VecDeque<Vec<u8>>,
    /// Queued outbound frames (length prefix included).
    outbound: VecDeque<Vec<u8>>,
    /// Frame currently being written, with its progress offset.
    write_buf: Option<(Vec<u8>, usize)>,
    /// Our 4-byte handshake control value.
    hs_value: u32,
    /// Bytes of the peer's control value received so far.
    hs_in: [u8; 4],
    /// How many handshake bytes are in `hs_in`.
    hs_in_len: usize,
    /// How many of our handshake bytes have been written.
    hs_out_len: usize,
    /// The peer's control value, once fully received.
    peer_value: Option<u32>,
    /// Largest frame payload we accept.
    max_message_size: usize,
    /// The pool our buffers came from.
    pool: Arc<BufferPool>,
}

impl ChannelContext {
    /// Create a context for a new channel.
    ///
    /// `hs_value` is the control value we announce (our control port);
    /// the initial state follows from `role`.
    pub fn new(
        role: ChannelRole,
        hs_value: u32,
        max_message_size: usize,
        pool: Arc<BufferPool>,
    ) -> Self {
        let state = match role {
            ChannelRole::Connector => ChannelState::SendingHandshake,
            ChannelRole::Acceptor => ChannelState::ReceivingHandshake,
        };
        let mut chunk = pool.acquire();
        chunk.resize(pool.chunk_size(), 0);
        let acc = pool.acquire();
        Self {
            id: next_channel_id(),
            state,
            chunk,
            acc,
            received: VecDeque::new(),
            outbound: VecDeque::new(),
            write_buf: None,
            hs_value,
            hs_in: [0; 4],
            hs_in_len: 0,
            hs_out_len: 0,
            peer_value: None,
            max_message_size,
            pool,
        }
    }

    /// This channel's id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The peer's control value, once the handshake completed.
    pub fn peer_value(&self) -> Option<u32> {
        self.peer_value
    }

    /// Whether both directions of the handshake have completed.
    pub fn handshake_complete(&self) -> bool {
        self.peer_value.is_some() && self.hs_out_len >= 4
    }

    /// Queue a framed message for sending. Called by the channel driver
    /// after draining the cross-thread outbound queue.
    pub fn enqueue_frame(&mut self, frame: Vec<u8>) {
        self.outbound.push_back(frame);
    }

    /// Whether any outbound bytes are pending.
    pub fn has_pending_output(&self) -> bool {
        self.write_buf.is_some() || !self.outbound.is_empty()
    }

    /// Pop the next fully assembled inbound frame payload.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.received.pop_front()
    }

    /// Move the machine along the given transition.
    pub fn apply(&mut self, transition: Transition, table: &TransitionTable) {
        let (state, _) = table.target(transition);
        self.state = state;
    }

    /// The interest set the driver should wait on for the current state.
    ///
    /// In the decision state with nothing to write, waiting on write
    /// readiness would spin (sockets are almost always writable), so the
    /// interest narrows to read.
    pub fn interest(&self, table: &TransitionTable) -> Interest {
        let transition = match self.state {
            ChannelState::Idle => Transition::ToIdle,
            ChannelState::SendingHandshake => Transition::ToSendingHandshake,
            ChannelState::ReceivingHandshake => Transition::ToReceivingHandshake,
            ChannelState::SendingOrReceiving => Transition::ToSendingOrReceiving,
            ChannelState::Receiving => Transition::ToReceiving,
            ChannelState::Sending => Transition::ToSending,
        };
        let (_, interest) = table.target(transition);
        if self.state == ChannelState::SendingOrReceiving && !self.has_pending_output() {
            return interest.difference(Interest::WRITE);
        }
        interest
    }

    // ── Internal I/O steps ──────────────────────────────────────────────

    /// Read as much as possible, folding bytes into the accumulator and
    /// extracting complete frames. Returns whether at least one frame
    /// completed during this step.
    fn recv_step(&mut self, io: &mut impl ChannelIo) -> Result<bool> {
        // Bytes may already be buffered from a previous step even when the
        // socket has nothing new; parse before and after reading.
        let mut completed = self.extract_frames()?;
        loop {
            match io.try_read(&mut self.chunk)? {
                ReadOutcome::Data(n) => {
                    self.acc.extend_from_slice(&self.chunk[..n]);
                    if self.extract_frames()? {
                        completed = true;
                    }
                }
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Eof => return Err(NetError::ConnectionClosed),
            }
        }
        Ok(completed)
    }

    /// Pull every complete `[len: u32-le][payload]` frame out of the
    /// accumulator.
    fn extract_frames(&mut self) -> Result<bool> {
        let mut completed = false;
        loop {
            if self.acc.len() < 4 {
                return Ok(completed);
            }
            let header: [u8; 4] = self.acc[..4].try_into().expect("4-byte slice");
            let len = u32::from_le_bytes(header) as usize;
            if len > self.max_message_size {
                return Err(NetError::ProtocolViolation(format!(
                    "frame of {len} bytes exceeds limit of {} bytes",
                    self.max_message_size
                )));
            }
            let total = len.saturating_add(4);
            if self.acc.len() < total {
                return Ok(completed);
            }
            let payload = self.acc[4..total].to_vec();
            self.acc.drain(..total);
            self.received.push_back(payload);
            completed = true;
        }
    }

    /// Drain queued outbound frames. Returns whether everything was flushed.
    fn send_step(&mut self, io: &mut impl ChannelIo) -> Result<bool> {
        loop {
            let (frame, mut pos) = match self.write_buf.take() {
                Some(in_flight) => in_flight,
                None => match self.outbound.pop_front() {
                    Some(frame) => (frame, 0),
                    None => return Ok(true),
                },
            };
            match io.try_write(&frame[pos..])? {
                WriteOutcome::Wrote(n) => {
                    pos = pos.saturating_add(n);
                    if pos < frame.len() {
                        self.write_buf = Some((frame, pos));
                    }
                    // A fully written frame is dropped here so previously
                    // sent payloads are never retained.
                }
                WriteOutcome::WouldBlock => {
                    self.write_buf = Some((frame, pos));
                    return Ok(false);
                }
            }
        }
    }

    /// Write the remaining bytes of our handshake value. Returns whether it
    /// was fully sent.
    fn send_handshake_step(&mut self, io: &mut impl ChannelIo) -> Result<bool> {
        let bytes = self.hs_value.to_le_bytes();
        while self.hs_out_len < 4 {
            match io.try_write(&bytes[self.hs_out_len..])? {
                WriteOutcome::Wrote(n) => {
                    self.hs_out_len = self.hs_out_len.saturating_add(n);
                }
                WriteOutcome::WouldBlock => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Read the remaining bytes of the peer's handshake value. Returns
    /// whether it was fully received.
    ///
    /// A control value has position-dependent framing: it is only complete
    /// once all 4 bytes are buffered.
    fn recv_handshake_step(&mut self, io: &mut impl ChannelIo) -> Result<bool> {
        while self.hs_in_len < 4 {
            let mut byte_buf = [0u8; 4];
            let want = 4usize.saturating_sub(self.hs_in_len);
            match io.try_read(&mut byte_buf[..want])? {
                ReadOutcome::Data(n) => {
                    self.hs_in[self.hs_in_len..self.hs_in_len.saturating_add(n)]
                        .copy_from_slice(&byte_buf[..n]);
                    self.hs_in_len = self.hs_in_len.saturating_add(n);
                }
                ReadOutcome::WouldBlock => return Ok(false),
                ReadOutcome::Eof => return Err(NetError::ConnectionClosed),
            }
        }
        self.peer_value = Some(u32::from_le_bytes(self.hs_in));
        Ok(true)
    }
}

impl Drop for ChannelContext {
    fn drop(&mut self) {
        let pool = Arc::clone(&self.pool);
        pool.release(std::mem::take(&mut self.chunk));
        pool.release(std::mem::take(&mut self.acc));
    }
}

/// Perform one state transition for the channel.
///
/// Called once per readiness notification. Expected conditions — partial
/// reads and writes — never error; the returned transition simply re-enters
/// the same state. Protocol violations and disconnection return errors, and
/// the caller must close the channel.
pub fn perform_transition(
    ctx: &mut ChannelContext,
    io: &mut impl ChannelIo,
) -> Result<Transition> {
    match ctx.state {
        ChannelState::Idle => Ok(Transition::ToIdle),

        ChannelState::SendingHandshake => {
            if !ctx.send_handshake_step(io)? {
                return Ok(Transition::ToSendingHandshake);
            }
            if ctx.peer_value.is_none() {
                Ok(Transition::ToReceivingHandshake)
            } else {
                Ok(Transition::ToSendingOrReceiving)
            }
        }

        ChannelState::ReceivingHandshake => {
            if !ctx.recv_handshake_step(io)? {
                return Ok(Transition::ToReceivingHandshake);
            }
            if ctx.hs_out_len < 4 {
                Ok(Transition::ToSendingHandshake)
            } else {
                Ok(Transition::ToSendingOrReceiving)
            }
        }

        ChannelState::SendingOrReceiving => {
            if ctx.has_pending_output() {
                if ctx.send_step(io)? {
                    Ok(Transition::ToSendingOrReceiving)
                } else {
                    Ok(Transition::ToSending)
                }
            } else if ctx.recv_step(io)? {
                Ok(Transition::ToSendingOrReceiving)
            } else if !ctx.acc.is_empty() {
                // A frame is in flight; keep reading.
                Ok(Transition::ToReceiving)
            } else {
                Ok(Transition::ToSendingOrReceiving)
            }
        }

        ChannelState::Receiving => {
            if ctx.recv_step(io)? {
                Ok(Transition::ToSendingOrReceiving)
            } else {
                Ok(Transition::ToReceiving)
            }
        }

        ChannelState::Sending => {
            if ctx.send_step(io)? {
                Ok(Transition::ToSendingOrReceiving)
            } else {
                Ok(Transition::ToSending)
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted I/O double: reads come from a queue of byte chunks, writes
    /// land in a sink bounded by a depletable budget (0 remaining blocks).
    struct ScriptedIo {
        reads: VecDeque<Vec<u8>>,
        eof_after_reads: bool,
        written: Vec<u8>,
        write_budget: usize,
    }

    impl ScriptedIo {
        fn new() -> Self {
            Self {
                reads: VecDeque::new(),
                eof_after_reads: false,
                written: Vec::new(),
                write_budget: usize::MAX,
            }
        }

        fn push_read(&mut self, bytes: &[u8]) {
            self.reads.push_back(bytes.to_vec());
        }
    }

    impl ChannelIo for ScriptedIo {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
            match self.reads.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(chunk[n..].to_vec());
                    }
                    Ok(ReadOutcome::Data(n))
                }
                None if self.eof_after_reads => Ok(ReadOutcome::Eof),
                None => Ok(ReadOutcome::WouldBlock),
            }
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
            if self.write_budget == 0 {
                return Ok(WriteOutcome::WouldBlock);
            }
            let n = buf.len().min(self.write_budget);
            self.write_budget -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(WriteOutcome::Wrote(n))
        }
    }

    fn steady_context() -> ChannelContext {
        let pool = Arc::new(BufferPool::new(64, 8));
        let mut ctx = ChannelContext::new(ChannelRole::Connector, 7, 1_024, pool);
        // Skip the handshake for steady-state tests.
        ctx.hs_out_len = 4;
        ctx.peer_value = Some(9);
        ctx.state = ChannelState::SendingOrReceiving;
        ctx
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut framed = (payload.len() as u32).to_le_bytes().to_vec();
        framed.extend_from_slice(payload);
        framed
    }

    #[test]
    fn test_handshake_exchange_connector() {
        let pool = Arc::new(BufferPool::new(64, 8));
        let mut ctx = ChannelContext::new(ChannelRole::Connector, 11111, 1_024, pool);
        let mut io = ScriptedIo::new();
        io.push_read(&22222u32.to_le_bytes());

        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToReceivingHandshake);
        assert_eq!(io.written, 11111u32.to_le_bytes());
        ctx.apply(t, &TransitionTable::new());

        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingOrReceiving);
        assert_eq!(ctx.peer_value(), Some(22222));
        assert!(ctx.handshake_complete());
    }

    #[test]
    fn test_handshake_partial_control_value() {
        let pool = Arc::new(BufferPool::new(64, 8));
        let mut ctx = ChannelContext::new(ChannelRole::Acceptor, 1, 1_024, pool);
        let mut io = ScriptedIo::new();
        let peer = 33333u32.to_le_bytes();
        io.push_read(&peer[..2]);

        // Two of four bytes: the control value is not yet decodable.
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToReceivingHandshake);
        assert_eq!(ctx.peer_value(), None);

        io.push_read(&peer[2..]);
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingHandshake);
        assert_eq!(ctx.peer_value(), Some(33333));
    }

    #[test]
    fn test_partial_read_repeats_receiving() {
        let table = TransitionTable::new();
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        let framed = frame(b"hello world");
        io.push_read(&framed[..5]);

        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToReceiving);
        ctx.apply(t, &table);

        io.push_read(&framed[5..]);
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingOrReceiving);
        assert_eq!(ctx.next_frame().unwrap(), b"hello world");
    }

    #[test]
    fn test_liveness_receive_then_send_never_idles() {
        // A fully received message followed immediately by a fully sent
        // response must return the channel to SendingOrReceiving without
        // ever entering Idle.
        let table = TransitionTable::new();
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        let inbound = frame(b"request");
        io.push_read(&inbound[..3]);

        let mut states = vec![ctx.state()];
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        ctx.apply(t, &table);
        states.push(ctx.state());

        io.push_read(&inbound[3..]);
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        ctx.apply(t, &table);
        states.push(ctx.state());
        assert_eq!(ctx.next_frame().unwrap(), b"request");

        ctx.enqueue_frame(frame(b"response"));
        let t = perform_transition(&mut ctx, &mut io).unwrap();
        ctx.apply(t, &table);
        states.push(ctx.state());

        assert_eq!(
            states,
            vec![
                ChannelState::SendingOrReceiving,
                ChannelState::Receiving,
                ChannelState::SendingOrReceiving,
                ChannelState::SendingOrReceiving,
            ]
        );
        assert!(!states.contains(&ChannelState::Idle));
        assert_eq!(io.written, frame(b"response"));
    }

    #[test]
    fn test_partial_write_repeats_sending() {
        let table = TransitionTable::new();
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        io.write_budget = 3;
        ctx.enqueue_frame(frame(b"payload"));

        let mut t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSending);
        ctx.apply(t, &table);

        io.write_budget = usize::MAX;
        t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingOrReceiving);
        assert_eq!(io.written, frame(b"payload"));
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        let mut bytes = frame(b"one");
        bytes.extend_from_slice(&frame(b"two"));
        io.push_read(&bytes);

        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingOrReceiving);
        assert_eq!(ctx.next_frame().unwrap(), b"one");
        assert_eq!(ctx.next_frame().unwrap(), b"two");
        assert!(ctx.next_frame().is_none());
    }

    #[test]
    fn test_buffered_frame_decoded_without_new_bytes() {
        // Zero new bytes read, but a complete frame already sits in the
        // accumulator: that is "more to process", not EOF.
        let mut ctx = steady_context();
        ctx.acc.extend_from_slice(&frame(b"stale"));
        let mut io = ScriptedIo::new();

        let t = perform_transition(&mut ctx, &mut io).unwrap();
        assert_eq!(t, Transition::ToSendingOrReceiving);
        assert_eq!(ctx.next_frame().unwrap(), b"stale");
    }

    #[test]
    fn test_eof_is_disconnect() {
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        io.eof_after_reads = true;

        let result = perform_transition(&mut ctx, &mut io);
        assert!(matches!(result, Err(NetError::ConnectionClosed)));
    }

    #[test]
    fn test_oversized_frame_is_protocol_violation() {
        let mut ctx = steady_context();
        let mut io = ScriptedIo::new();
        io.push_read(&(2_000_000u32).to_le_bytes());

        let result = perform_transition(&mut ctx, &mut io);
        assert!(matches!(result, Err(NetError::ProtocolViolation(_))));
    }

    #[test]
    fn test_idle_returns_to_itself() {
        let mut ctx = steady_context();
        ctx.state = ChannelState::Idle;
        let mut io = ScriptedIo::new();
        assert_eq!(
            perform_transition(&mut ctx, &mut io).unwrap(),
            Transition::ToIdle
        );
    }

    #[test]
    fn test_interest_narrows_without_output() {
        let table = TransitionTable::new();
        let mut ctx = steady_context();
        assert_eq!(ctx.interest(&table), Interest::READ);
        ctx.enqueue_frame(frame(b"x"));
        assert_eq!(ctx.interest(&table), Interest::READ | Interest::WRITE);
    }

    #[test]
    fn test_channel_ids_are_unique() {
        let pool = Arc::new(BufferPool::new(64, 8));
        let a = ChannelContext::new(ChannelRole::Connector, 0, 64, Arc::clone(&pool));
        let b = ChannelContext::new(ChannelRole::Connector, 0, 64, pool);
        assert_ne!(a.id(), b.id());
    }
}
