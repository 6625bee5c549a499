//! Request-head parsing and response encoding for the discovery surface.

use std::io::Write;
use thiserror::Error;

/// Largest request head accepted before the discovery/upgrade decision
pub const MAX_HEAD_SIZE: usize = 8192;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=UTF-8";

/// Transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    /// Request head could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Request head exceeded MAX_HEAD_SIZE
    #[error("Request head too large: {0} bytes")]
    HeadTooLarge(usize),
    /// Client did not finish its request head in time
    #[error("Handshake timed out")]
    HandshakeTimeout,
    /// WebSocket upgrade was refused or failed
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
    /// WebSocket protocol violation on an established session
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::ConnectionClosed
        } else {
            TransportError::Io(e)
        }
    }
}

/// The request line and headers of an HTTP/1.x request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Length of the head (including the blank line) if `data` holds a complete one
    pub fn find_end(data: &[u8]) -> Option<usize> {
        data.windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| pos + 4)
    }

    /// Parse a complete request head
    pub fn parse(data: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| TransportError::InvalidRequest("Request head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| TransportError::InvalidRequest("Missing request line".to_string()))?;
        let mut parts = request_line.split(' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if !m.is_empty() && p.starts_with('/') => (m, p, v),
            _ => {
                return Err(TransportError::InvalidRequest(format!(
                    "Malformed request line: {:?}",
                    request_line
                )))
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(TransportError::InvalidRequest(format!(
                "Unsupported HTTP version: {}",
                version
            )));
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|l| !l.is_empty()) {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TransportError::InvalidRequest(format!("Malformed header: {:?}", line))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RequestHead {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Look up a header value (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Host` header, if the client sent one
    pub fn host(&self) -> Option<&str> {
        self.header("Host").filter(|h| !h.is_empty())
    }

    /// Whether the client asks for a WebSocket upgrade
    pub fn is_upgrade(&self) -> bool {
        self.header("Upgrade")
            .map(|v| v.to_ascii_lowercase().contains("websocket"))
            .unwrap_or(false)
    }
}

/// A `200 OK` discovery response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    pub fn json(body: impl Into<String>) -> Self {
        Response {
            content_type: CONTENT_TYPE_JSON,
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Response {
            content_type: CONTENT_TYPE_TEXT,
            body: body.into(),
        }
    }

    /// Encode headers and body to wire format
    pub fn encode(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.0 200 OK\r\n\
             Content-Type: {}\r\n\
             Cache-Control: no-cache\r\n\
             Content-Length: {}\r\n\
             \r\n",
            self.content_type,
            self.body.len()
        );
        let mut result = Vec::with_capacity(head.len() + self.body.len());
        result.extend(head.as_bytes());
        result.extend(self.body.as_bytes());
        result
    }

    /// Write response to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TransportError> {
        writer.write_all(&self.encode())?;
        writer.flush()?;
        Ok(())
    }
}
