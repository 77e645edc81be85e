//! Listener for inbound node channels.
//!
//! Accepts TCP connections, applies the configured socket receive-buffer
//! size, and hands every connection to the channel driver starting in the
//! handshake bootstrap. All channel events funnel into one queue consumed by
//! the dispatch layer.

use {
    crate::{
        buffer::BufferPool,
        channel::{spawn_channel, ChannelEvent},
        config::NetConfig,
        error::Result,
        state::{ChannelRole, TransitionTable},
    },
    log::{debug, error, info},
    std::{net::SocketAddr, sync::Arc},
    tokio::{
        net::{TcpListener, TcpSocket},
        sync::mpsc,
    },
};

/// How many buffers the shared pool retains per channel-sized workload.
const POOL_RETENTION: usize = 128;

/// Handle returned by [`NetServer::start`].
pub struct NetHandle {
    /// Channel events from every accepted connection.
    pub events: mpsc::Receiver<ChannelEvent>,
    /// The local address the listener is bound to (useful when port = 0).
    pub local_addr: SocketAddr,
    /// The shared buffer pool, for outgoing channels.
    pub pool: Arc<BufferPool>,
    /// The shared transition table, for outgoing channels.
    pub table: Arc<TransitionTable>,
    /// Sender side of the event queue, for outgoing channels.
    pub events_tx: mpsc::Sender<ChannelEvent>,
}

/// Listens for inbound channel connections.
pub struct NetServer {
    config: NetConfig,
}

impl NetServer {
    /// Create a listener with the given config.
    pub fn new(config: NetConfig) -> Self {
        Self { config }
    }

    /// Bind and start accepting connections.
    pub async fn start(self) -> Result<NetHandle> {
        let socket = match self.config.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_recv_buffer_size(self.config.receive_buffer_size as u32)?;
        socket.bind(self.config.bind_addr)?;
        let listener = socket.listen(1_024)?;
        let local_addr = listener.local_addr()?;
        info!("taskgrid listener on {}", local_addr);

        let (tx, rx) = mpsc::channel::<ChannelEvent>(self.config.channel_buffer_size);
        let pool = Arc::new(BufferPool::new(self.config.max_chunk_size, POOL_RETENTION));
        let table = Arc::new(TransitionTable::new());

        let handshake_value = if self.config.control_port == 0 {
            u32::from(local_addr.port())
        } else {
            u32::from(self.config.control_port)
        };
        let max_message_size = self.config.max_message_size;

        {
            let tx = tx.clone();
            let pool = Arc::clone(&pool);
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                Self::accept_loop(listener, handshake_value, max_message_size, pool, table, tx)
                    .await;
            });
        }

        Ok(NetHandle {
            events: rx,
            local_addr,
            pool,
            table,
            events_tx: tx,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        handshake_value: u32,
        max_message_size: usize,
        pool: Arc<BufferPool>,
        table: Arc<TransitionTable>,
        tx: mpsc::Sender<ChannelEvent>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("accepted channel connection from {}", addr);
                    // The handle returned here is dropped on purpose: until
                    // the handshake completes, the driving task keeps the
                    // only live handle and surfaces it in the Opened event.
                    let _ = spawn_channel(
                        stream,
                        ChannelRole::Acceptor,
                        handshake_value,
                        max_message_size,
                        Arc::clone(&pool),
                        Arc::clone(&table),
                        tx.clone(),
                        None,
                    );
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::channel::connect,
        std::time::Duration,
        taskgrid_protocol::WireMessage,
        tokio::time::timeout,
        uuid::Uuid,
    };

    async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for channel event")
            .expect("event queue closed")
    }

    #[tokio::test]
    async fn test_handshake_then_frame_roundtrip() {
        let cfg = NetConfig::dev_default();
        let max = cfg.max_message_size;
        let mut handle = NetServer::new(cfg).start().await.unwrap();
        let addr = handle.local_addr;

        let (client_tx, mut client_rx) = mpsc::channel(16);
        let client = connect(
            addr,
            4242,
            max,
            Arc::clone(&handle.pool),
            Arc::clone(&handle.table),
            client_tx,
        )
        .await
        .unwrap();

        // Server side announces the new channel with the client's value.
        let opened = next_event(&mut handle.events).await;
        let server_side = match opened {
            ChannelEvent::Opened {
                peer_value, handle, ..
            } => {
                assert_eq!(peer_value, 4242);
                handle
            }
            other => panic!("expected Opened, got {:?}", other),
        };

        // Client side sees the server's control value too.
        match next_event(&mut client_rx).await {
            ChannelEvent::Opened { peer_value, .. } => {
                assert_eq!(peer_value, u32::from(addr.port()));
            }
            other => panic!("expected Opened, got {:?}", other),
        }

        // Client → server.
        let hello = WireMessage::Hello {
            node_uuid: Uuid::new_v4(),
            control_port: 9,
            max_tasks: 5,
        };
        client.send_message(&hello).unwrap();
        match next_event(&mut handle.events).await {
            ChannelEvent::Frame { payload, .. } => {
                assert_eq!(WireMessage::deserialize(&payload).unwrap(), hello);
            }
            other => panic!("expected Frame, got {:?}", other),
        }

        // Server → client.
        server_side.send_message(&WireMessage::HeartbeatAck).unwrap();
        match next_event(&mut client_rx).await {
            ChannelEvent::Frame { payload, .. } => {
                assert_eq!(
                    WireMessage::deserialize(&payload).unwrap(),
                    WireMessage::HeartbeatAck
                );
            }
            other => panic!("expected Frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_disconnect_surfaces_closed() {
        let cfg = NetConfig::dev_default();
        let max = cfg.max_message_size;
        let mut handle = NetServer::new(cfg).start().await.unwrap();
        let addr = handle.local_addr;

        let (client_tx, mut client_rx) = mpsc::channel(16);
        let client = connect(
            addr,
            1,
            max,
            Arc::clone(&handle.pool),
            Arc::clone(&handle.table),
            client_tx,
        )
        .await
        .unwrap();

        let server_channel = match next_event(&mut handle.events).await {
            ChannelEvent::Opened { channel, .. } => channel,
            other => panic!("expected Opened, got {:?}", other),
        };
        // Drain the client's own Opened event.
        let _ = next_event(&mut client_rx).await;

        // Dropping the last client handle closes the connection; the server
        // side must observe the disconnect rather than swallow it.
        drop(client);
        match next_event(&mut handle.events).await {
            ChannelEvent::Closed { channel, .. } => assert_eq!(channel, server_channel),
            other => panic!("expected Closed, got {:?}", other),
        }
    }
}
