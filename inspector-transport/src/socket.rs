//! Polled TCP listener and classification of freshly accepted connections.

use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::websocket::WebSocketConnection;
use crate::{RequestHead, Response, TransportError, MAX_HEAD_SIZE};

/// Upper bound for a client to deliver its request head
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between peeks while a request head is still arriving
const PEEK_INTERVAL: Duration = Duration::from_millis(5);

/// A non-blocking TCP listener
pub struct Listener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    /// Bind and start listening. The listener is non-blocking so the
    /// owning loop can interleave accepts with session I/O.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        Ok(Listener { listener, addr })
    }

    /// Accept a pending connection, if any
    pub fn poll_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, std::io::Error> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                // Some platforms let accepted sockets inherit O_NONBLOCK
                stream.set_nonblocking(false)?;
                let _ = stream.set_nodelay(true);
                Ok(Some((stream, peer)))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the address this listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// An accepted connection whose request head is still arriving.
///
/// The socket is non-blocking; each `poll_head` peeks once and returns
/// straight away, so one silent client cannot stall its owner.
pub struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    deadline: Instant,
}

/// Result of one look at an `Incoming` connection
#[derive(Debug)]
pub enum HeadPoll {
    /// The full head is buffered
    Ready(PendingConnection),
    /// Not yet; poll again later
    Waiting(Incoming),
}

impl Incoming {
    /// Start tracking `stream`; it must deliver its head within `timeout`
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        stream.set_nonblocking(true)?;
        Ok(Incoming {
            stream,
            peer,
            deadline: Instant::now() + timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Peek without blocking. Fails on EOF, an oversized or malformed head,
    /// or once the deadline has passed.
    pub fn poll_head(self) -> Result<HeadPoll, TransportError> {
        let mut buf = vec![0u8; MAX_HEAD_SIZE];
        match self.stream.peek(&mut buf) {
            Ok(0) => Err(TransportError::ConnectionClosed),
            Ok(n) => {
                if let Some(head_len) = RequestHead::find_end(&buf[..n]) {
                    let head = RequestHead::parse(&buf[..head_len])?;
                    trace!(peer = %self.peer, method = %head.method, path = %head.path, "request head");
                    self.stream.set_nonblocking(false)?;
                    return Ok(HeadPoll::Ready(PendingConnection {
                        stream: self.stream,
                        peer: self.peer,
                        head,
                        head_len,
                    }));
                }
                if n == buf.len() {
                    return Err(TransportError::HeadTooLarge(n));
                }
                self.keep_waiting()
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => self.keep_waiting(),
            Err(e) => Err(e.into()),
        }
    }

    fn keep_waiting(self) -> Result<HeadPoll, TransportError> {
        if Instant::now() >= self.deadline {
            Err(TransportError::HandshakeTimeout)
        } else {
            Ok(HeadPoll::Waiting(self))
        }
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("peer", &self.peer)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// An accepted connection whose request head has arrived but not been consumed.
///
/// The head is only peeked so that an upgrade can hand the untouched stream
/// to the WebSocket handshake.
pub struct PendingConnection {
    stream: TcpStream,
    peer: SocketAddr,
    head: RequestHead,
    head_len: usize,
}

impl PendingConnection {
    /// Wait (up to `timeout`) for a complete request head on `stream`
    pub fn read_head(
        stream: TcpStream,
        peer: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut incoming = Incoming::new(stream, peer, timeout)?;
        loop {
            match incoming.poll_head()? {
                HeadPoll::Ready(pending) => return Ok(pending),
                HeadPoll::Waiting(next) => {
                    incoming = next;
                    std::thread::sleep(PEEK_INTERVAL);
                }
            }
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Answer a plain HTTP request and close the connection
    pub fn respond(mut self, response: &Response) -> Result<(), TransportError> {
        self.consume_head()?;
        response.write_to(&mut self.stream)?;
        let _ = self.stream.shutdown(Shutdown::Write);
        Ok(())
    }

    /// Close the connection without answering
    pub fn reject(mut self) {
        // Draining the head avoids a reset racing any bytes already in flight
        let _ = self.consume_head();
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Complete the WebSocket handshake, accepting only `control_path`
    pub fn upgrade(self, control_path: &str) -> Result<WebSocketConnection, TransportError> {
        self.stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        WebSocketConnection::accept(self.stream, self.peer, control_path)
    }

    fn consume_head(&mut self) -> Result<(), TransportError> {
        let mut head = vec![0u8; self.head_len];
        self.stream.read_exact(&mut head)?;
        Ok(())
    }
}

impl std::fmt::Debug for PendingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnection")
            .field("peer", &self.peer)
            .field("head", &self.head)
            .finish()
    }
}
