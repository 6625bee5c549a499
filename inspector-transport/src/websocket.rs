//! WebSocket session carrying whole UTF-8 protocol messages.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, trace};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::{accept_hdr, WebSocket};

use crate::TransportError;

/// Outcome of polling a session for inbound data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvEvent {
    /// A complete text message
    Text(String),
    /// Nothing arrived within the poll interval
    Idle,
    /// Peer closed the connection (close frame or EOF)
    Closed,
}

/// An upgraded WebSocket connection
pub struct WebSocketConnection {
    websocket: WebSocket<TcpStream>,
    peer: SocketAddr,
}

impl WebSocketConnection {
    /// Perform the server side of the handshake. Requests for any path other
    /// than `control_path` are answered with 404 and fail.
    #[allow(clippy::result_large_err)]
    pub(crate) fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        control_path: &str,
    ) -> Result<Self, TransportError> {
        let expected = control_path.to_string();
        let callback = move |request: &Request, response: Response| {
            let path = request.uri().path();
            if path == expected {
                Ok(response)
            } else {
                let mut rejection: ErrorResponse = ErrorResponse::new(Some(format!(
                    "No inspector target at {}",
                    path
                )));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let websocket =
            accept_hdr(stream, callback).map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(%peer, "websocket upgraded");
        Ok(WebSocketConnection { websocket, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Bound how long `poll_recv` may block
    pub fn set_poll_interval(&self, interval: Duration) -> Result<(), std::io::Error> {
        self.websocket.get_ref().set_read_timeout(Some(interval))
    }

    /// A second handle on the socket, used to force-close it from another thread
    pub fn shutdown_handle(&self) -> Result<TcpStream, std::io::Error> {
        self.websocket.get_ref().try_clone()
    }

    /// Send one text message
    pub fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.websocket
            .send(WsMessage::Text(text.to_string()))
            .map_err(Self::convert_ws_error)
    }

    /// Wait up to the poll interval for the next text message
    pub fn poll_recv(&mut self) -> Result<RecvEvent, TransportError> {
        loop {
            let ws_msg = match self.websocket.read() {
                Ok(msg) => msg,
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => return Ok(RecvEvent::Closed),
                Err(e) => {
                    return match Self::convert_ws_error(e) {
                        TransportError::Io(ref io_err)
                            if io_err.kind() == std::io::ErrorKind::WouldBlock
                                || io_err.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            Ok(RecvEvent::Idle)
                        }
                        TransportError::ConnectionClosed => Ok(RecvEvent::Closed),
                        other => Err(other),
                    };
                }
            };

            match ws_msg {
                WsMessage::Text(text) => return Ok(RecvEvent::Text(text)),
                WsMessage::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Ok(RecvEvent::Text(text)),
                    Err(_) => {
                        trace!(peer = %self.peer, "dropping non-UTF-8 binary frame");
                    }
                },
                WsMessage::Close(_) => {
                    // Sends the queued close reply
                    let _ = self.websocket.flush();
                    return Ok(RecvEvent::Closed);
                }
                WsMessage::Ping(_) => {
                    // The pong is queued by tungstenite; push it out now
                    let _ = self.websocket.flush();
                }
                WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    /// Close the session gracefully (best effort)
    pub fn close(&mut self) {
        let _ = self.websocket.close(None);
        let _ = self.websocket.flush();
    }

    fn convert_ws_error(e: tungstenite::Error) -> TransportError {
        match e {
            tungstenite::Error::Io(io_err) => io_err.into(),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::ConnectionClosed
            }
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("peer", &self.peer)
            .finish()
    }
}
