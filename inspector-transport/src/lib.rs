//! # Inspector Transport
//!
//! Byte-level plumbing for the remote inspector: a polled TCP listener, the
//! plain-HTTP request head that decides between discovery and upgrade, and
//! the WebSocket session that carries whole UTF-8 protocol messages.
//!
//! ## Connection flow
//!
//! ```text
//! accept -> peek request head -+-> GET (no upgrade)  -> discovery response, close
//!                              +-> GET + Upgrade     -> WebSocket handshake -> session
//! ```
//!
//! ## Discovery response format
//!
//! | Header | Value |
//! |--------|-------|
//! | status line | `HTTP/1.0 200 OK` |
//! | `Content-Type` | `application/json; charset=UTF-8` or `text/plain; charset=UTF-8` |
//! | `Cache-Control` | `no-cache` |
//! | `Content-Length` | body length in bytes |

mod http;
pub mod socket;
pub mod websocket;

pub use http::{RequestHead, Response, TransportError, MAX_HEAD_SIZE};
pub use socket::{HeadPoll, Incoming, Listener, PendingConnection};
pub use websocket::{RecvEvent, WebSocketConnection};
