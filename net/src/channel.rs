//! Non-blocking channel driver.
//!
//! One tokio task owns each channel: it waits for the readiness matching the
//! state machine's current interest set (plus an outbound-enqueue wakeup),
//! runs [`perform_transition`], and emits [`ChannelEvent`]s to the dispatch
//! layer. Channel state is mutated only by this task; other components
//! enqueue outbound frames through a [`ChannelHandle`], never by touching
//! the context directly.

use {
    crate::{
        buffer::BufferPool,
        error::{NetError, Result},
        state::{
            perform_transition, ChannelContext, ChannelId, ChannelIo, ChannelRole, ChannelState,
            Interest, ReadOutcome, Transition, TransitionTable, WriteOutcome,
        },
    },
    log::{debug, warn},
    std::{io, net::SocketAddr, sync::Arc},
    taskgrid_protocol::WireMessage,
    tokio::{net::TcpStream, sync::mpsc},
};

/// Callback run once the channel handshake completes, before the `Opened`
/// event is delivered. Used to finish pairing logic that must observe the
/// peer's control value.
pub type HandshakeCallback = Box<dyn FnOnce(&ChannelHandle) + Send>;

/// Events a channel reports to the dispatch layer.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The handshake completed; the channel is in steady state.
    Opened {
        /// Channel id.
        channel: ChannelId,
        /// Remote socket address.
        addr: SocketAddr,
        /// The peer's 4-byte control value (its control port).
        peer_value: u32,
        /// Handle for enqueueing outbound messages.
        handle: ChannelHandle,
    },
    /// A full inbound frame was assembled.
    Frame {
        /// Channel id.
        channel: ChannelId,
        /// Frame payload with the length prefix stripped.
        payload: Vec<u8>,
    },
    /// The channel closed. `error` is `None` for an orderly local close.
    Closed {
        /// Channel id.
        channel: ChannelId,
        /// What went wrong, if anything.
        error: Option<NetError>,
    },
}

/// Cross-thread sender for a channel's outbound queue.
///
/// Dropping every handle of a channel closes it in an orderly fashion.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    max_message_size: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelHandle {
    /// The channel this handle feeds.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Enqueue an already-framed byte sequence.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.tx.send(frame).map_err(|_| NetError::ChannelClosed)
    }

    /// Frame and enqueue a wire message.
    pub fn send_message(&self, msg: &WireMessage) -> Result<()> {
        let frame = msg.serialize_framed(self.max_message_size)?;
        self.send_frame(frame)
    }
}

/// [`ChannelIo`] over a tokio `TcpStream`.
struct TokioChannelIo<'a> {
    stream: &'a TcpStream,
}

impl ChannelIo for TokioChannelIo<'_> {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.stream.try_read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        match self.stream.try_write(buf) {
            Ok(n) => Ok(WriteOutcome::Wrote(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }
}

fn to_tokio_interest(interest: Interest) -> tokio::io::Interest {
    match (
        interest.contains(Interest::READ),
        interest.contains(Interest::WRITE),
    ) {
        (true, true) => tokio::io::Interest::READABLE.add(tokio::io::Interest::WRITABLE),
        (false, true) => tokio::io::Interest::WRITABLE,
        // READ-only and the empty set both land here; the empty set is
        // handled before `ready()` is ever called.
        _ => tokio::io::Interest::READABLE,
    }
}

/// Register a connected stream with the channel driver.
///
/// Spawns the driving task and returns a handle for outbound traffic. The
/// optional `on_handshake` callback runs on the driving task right after the
/// control-value exchange completes.
pub fn spawn_channel(
    stream: TcpStream,
    role: ChannelRole,
    handshake_value: u32,
    max_message_size: usize,
    pool: Arc<BufferPool>,
    table: Arc<TransitionTable>,
    events: mpsc::Sender<ChannelEvent>,
    on_handshake: Option<HandshakeCallback>,
) -> ChannelHandle {
    let ctx = ChannelContext::new(role, handshake_value, max_message_size, pool);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ChannelHandle {
        id: ctx.id(),
        max_message_size,
        tx,
    };
    let pending = handle.clone();
    tokio::spawn(drive(stream, ctx, table, events, rx, pending, on_handshake));
    handle
}

/// Open an outgoing channel to `addr`.
pub async fn connect(
    addr: SocketAddr,
    handshake_value: u32,
    max_message_size: usize,
    pool: Arc<BufferPool>,
    table: Arc<TransitionTable>,
    events: mpsc::Sender<ChannelEvent>,
) -> Result<ChannelHandle> {
    let stream = TcpStream::connect(addr).await?;
    Ok(spawn_channel(
        stream,
        ChannelRole::Connector,
        handshake_value,
        max_message_size,
        pool,
        table,
        events,
        None,
    ))
}

/// The channel task: readiness loop around the state machine.
async fn drive(
    stream: TcpStream,
    mut ctx: ChannelContext,
    table: Arc<TransitionTable>,
    events: mpsc::Sender<ChannelEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending_handle: ChannelHandle,
    on_handshake: Option<HandshakeCallback>,
) {
    let id = ctx.id();
    let result = drive_inner(
        &stream,
        &mut ctx,
        &table,
        &events,
        &mut outbound_rx,
        pending_handle,
        on_handshake,
    )
    .await;

    match &result {
        Ok(()) => debug!("channel {} closed", id),
        Err(e) => warn!("channel {} closed with error: {}", id, e),
    }
    let _ = events
        .send(ChannelEvent::Closed {
            channel: id,
            error: result.err(),
        })
        .await;
}

async fn drive_inner(
    stream: &TcpStream,
    ctx: &mut ChannelContext,
    table: &TransitionTable,
    events: &mpsc::Sender<ChannelEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    pending_handle: ChannelHandle,
    mut on_handshake: Option<HandshakeCallback>,
) -> Result<()> {
    let id = ctx.id();
    let addr = stream.peer_addr()?;
    let mut pending_handle = Some(pending_handle);

    loop {
        // Fold everything other components have enqueued into the context.
        while let Ok(frame) = outbound_rx.try_recv() {
            ctx.enqueue_frame(frame);
        }
        if ctx.state() == ChannelState::Idle && ctx.has_pending_output() {
            ctx.apply(Transition::ToSendingOrReceiving, table);
        }

        let interest = ctx.interest(table);
        if interest.is_empty() {
            // Truly idle: only an outbound enqueue can wake the channel.
            match outbound_rx.recv().await {
                Some(frame) => {
                    ctx.enqueue_frame(frame);
                    continue;
                }
                None => return Ok(()),
            }
        }

        tokio::select! {
            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(frame) => {
                        ctx.enqueue_frame(frame);
                        continue;
                    }
                    // Every handle dropped: orderly close.
                    None => return Ok(()),
                }
            }
            ready = stream.ready(to_tokio_interest(interest)) => {
                let _ = ready?;
                let mut io = TokioChannelIo { stream };
                let transition = perform_transition(ctx, &mut io)?;
                ctx.apply(transition, table);
            }
        }

        if ctx.handshake_complete() {
            if let Some(handle) = pending_handle.take() {
                let peer_value = ctx.peer_value().unwrap_or_default();
                debug!("channel {} handshake complete, peer value {}", id, peer_value);
                if let Some(callback) = on_handshake.take() {
                    callback(&handle);
                }
                if events
                    .send(ChannelEvent::Opened {
                        channel: id,
                        addr,
                        peer_value,
                        handle,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }

        while let Some(payload) = ctx.next_frame() {
            if events
                .send(ChannelEvent::Frame {
                    channel: id,
                    payload,
                })
                .await
                .is_err()
            {
                // The event consumer is gone; shut down quietly.
                return Ok(());
            }
        }
    }
}
