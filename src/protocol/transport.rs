use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use thiserror::Error;

/// Identifies a request handed to a [Transport], and is returned with its completion
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportToken(pub u64);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}
impl TransportResponse {
    pub fn ok(headers: Vec<(String, String)>, body: Bytes) -> TransportResponse {
        TransportResponse {
            status: 200,
            headers,
            body,
        }
    }

    /// HTTP header names are case insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TransportError {
    #[error("invalid URL {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("response has no body")]
    MissingBody,
}

#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub token: TransportToken,
    pub result: Result<TransportResponse, TransportError>,
}

/// This is the abstraction of sending a GET request, separating the protocol state machine from
///  I/O. Implementations must not block: the outcome is reported later as a [TransportEvent]
///  carrying the same token.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    fn send(&self, token: TransportToken, url: &str);
}
