//! Blocking transport.
//!
//! The legacy counterpart of the channel driver: one transport owns one OS
//! thread pumping `receive → dispatch → send`. Worker nodes use this shape;
//! the driver side keeps it available so the dispatch layer stays agnostic
//! to which transport backs a given connection.
//!
//! Read deadlines are per-call, not sticky: `receive` arms the socket
//! timeout before reading and disarms it afterwards, even on error, so a
//! timeout never silently persists onto the next operation.

use {
    crate::error::{NetError, Result},
    log::debug,
    std::{
        io::{Read, Write},
        net::{Shutdown, SocketAddr, TcpStream},
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    },
    taskgrid_protocol::WireMessage,
};

/// A blocking, message-oriented transport over one TCP connection.
pub struct BlockingTransport {
    stream: TcpStream,
    closed: AtomicBool,
    max_message_size: usize,
}

impl BlockingTransport {
    /// Connect to `addr`.
    pub fn open(addr: SocketAddr, max_message_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::from_stream(stream, max_message_size))
    }

    /// Wrap an already-connected stream (e.g. one handed out by a listener).
    pub fn from_stream(stream: TcpStream, max_message_size: usize) -> Self {
        Self {
            stream,
            closed: AtomicBool::new(false),
            max_message_size,
        }
    }

    /// Whether this transport has been closed by an error or by `close()`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(NetError::TransportClosed);
        }
        Ok(())
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Serialize and send one message as a single logical unit.
    ///
    /// The serialization buffer is released as soon as the bytes are
    /// flushed, so previously sent payloads are never retained.
    pub fn send(&mut self, msg: &WireMessage) -> Result<()> {
        self.check_open()?;
        let frame = msg.serialize_framed(self.max_message_size)?;
        let result = self
            .stream
            .write_all(&frame)
            .and_then(|()| self.stream.flush());
        drop(frame);
        if let Err(e) = result {
            self.mark_closed();
            return Err(NetError::Io(e));
        }
        Ok(())
    }

    /// Receive one message, blocking indefinitely or until `timeout`.
    ///
    /// The read deadline applies to this call only and is reset to "no
    /// timeout" before returning.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<WireMessage> {
        self.check_open()?;
        if timeout.is_some() {
            self.stream.set_read_timeout(timeout)?;
        }
        let result = self.receive_inner();
        if timeout.is_some() {
            // Disable the timeout on subsequent read operations.
            self.stream.set_read_timeout(None)?;
        }
        result
    }

    fn receive_inner(&mut self) -> Result<WireMessage> {
        let mut header = [0u8; 4];
        if let Err(e) = self.stream.read_exact(&mut header) {
            return Err(self.classify_read_error(e));
        }
        let len = WireMessage::read_frame_len(&header);
        if len > self.max_message_size {
            self.mark_closed();
            return Err(NetError::ProtocolViolation(format!(
                "frame of {len} bytes exceeds limit of {} bytes",
                self.max_message_size
            )));
        }
        let mut payload = vec![0u8; len];
        if let Err(e) = self.stream.read_exact(&mut payload) {
            return Err(self.classify_read_error(e));
        }
        Ok(WireMessage::deserialize(&payload)?)
    }

    /// A timed-out read leaves the transport usable; anything else closes it.
    fn classify_read_error(&self, e: std::io::Error) -> NetError {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                let ms = self
                    .stream
                    .read_timeout()
                    .ok()
                    .flatten()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                NetError::Timeout(ms)
            }
            std::io::ErrorKind::UnexpectedEof => {
                self.mark_closed();
                NetError::ConnectionClosed
            }
            _ => {
                self.mark_closed();
                NetError::Io(e)
            }
        }
    }

    /// Close the transport. Idempotent.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
            debug!("blocking transport closed");
        }
    }
}

impl Drop for BlockingTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pump `receive → handler → send` until the peer disconnects.
///
/// This is the worker-node main loop: the calling thread is dedicated to the
/// connection. The handler returns an optional response to send back. A peer
/// disconnect ends the loop normally; other errors propagate.
pub fn serve_blocking<H>(mut transport: BlockingTransport, mut handler: H) -> Result<()>
where
    H: FnMut(WireMessage) -> Option<WireMessage>,
{
    loop {
        let msg = match transport.receive(None) {
            Ok(msg) => msg,
            Err(NetError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(response) = handler(msg) {
            transport.send(&response)?;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{net::TcpListener, thread},
        uuid::Uuid,
    };

    const MAX: usize = 1_048_576;

    fn paired() -> (BlockingTransport, BlockingTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || listener.accept().unwrap().0);
        let client = BlockingTransport::open(addr, MAX).unwrap();
        let server = BlockingTransport::from_stream(accept.join().unwrap(), MAX);
        (client, server)
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let (mut client, mut server) = paired();
        let msg = WireMessage::Heartbeat {
            node_uuid: Uuid::new_v4(),
        };
        client.send(&msg).unwrap();
        let received = server.receive(None).unwrap();
        assert_eq!(received, msg);
    }

    #[test]
    fn test_receive_timeout_does_not_stick() {
        let (mut client, mut server) = paired();

        // Nothing has been sent: the timed call must fail with Timeout and
        // leave the transport open.
        let err = server.receive(Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, NetError::Timeout(_)));
        assert!(!server.is_closed());

        // The deadline was reset: an untimed receive now blocks until the
        // message arrives rather than failing after 50ms.
        let msg = WireMessage::HeartbeatAck;
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            client.send(&msg).unwrap();
            client
        });
        let received = server.receive(None).unwrap();
        assert_eq!(received, WireMessage::HeartbeatAck);
        let _ = sender.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut client, _server) = paired();
        client.close();
        client.close();
        assert!(client.is_closed());
        let err = client
            .send(&WireMessage::HeartbeatAck)
            .unwrap_err();
        assert!(matches!(err, NetError::TransportClosed));
    }

    #[test]
    fn test_peer_disconnect_is_typed() {
        let (client, mut server) = paired();
        drop(client);
        let err = server.receive(None).unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
        assert!(server.is_closed());
    }

    #[test]
    fn test_serve_blocking_echoes_until_disconnect() {
        let (mut client, server) = paired();
        let pump = thread::spawn(move || {
            serve_blocking(server, |msg| match msg {
                WireMessage::Heartbeat { .. } => Some(WireMessage::HeartbeatAck),
                _ => None,
            })
        });

        client
            .send(&WireMessage::Heartbeat {
                node_uuid: Uuid::new_v4(),
            })
            .unwrap();
        assert_eq!(client.receive(None).unwrap(), WireMessage::HeartbeatAck);

        drop(client);
        pump.join().unwrap().unwrap();
    }
}
