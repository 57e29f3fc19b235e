use thiserror::Error;

pub type JpipResult<T> = Result<T, JpipError>;

/// The error taxonomy of the protocol engine and the databin cache.
///
/// Only [JpipError::InternalError] and argument validation errors are returned to callers as a
///  matter of course. Faults caused by the server (protocol violations, exhausted resources,
///  unexpected end-of-response codes) are routed to the session's single fault sink and surface
///  through the status listener instead.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum JpipError {
    #[error("malformed JPIP message header: {0}")]
    MalformedHeader(String),

    /// The server violated the JPIP framing contract
    #[error("JPIP protocol violation: {0}")]
    ProtocolViolation(String),

    /// Caller misuse, e.g. opening a session twice. This is never retried.
    #[error("internal error: {0}")]
    InternalError(String),

    #[error("too many out-of-order fragments pending for databin {0}")]
    CacheOverflow(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The server signalled that resources associated with the session are exhausted
    #[error("server resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("byte range {start}..{end} is not available, only {known} contiguous bytes are known")]
    RangeNotAvailable {
        start: u64,
        end: u64,
        known: u64,
    },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument {
        name: String,
        message: String,
    },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl JpipError {
    pub fn internal(message: impl Into<String>) -> JpipError {
        JpipError::InternalError(message.into())
    }

    pub fn protocol_violation(message: impl Into<String>) -> JpipError {
        JpipError::ProtocolViolation(message.into())
    }

    pub fn malformed_header(message: impl Into<String>) -> JpipError {
        JpipError::MalformedHeader(message.into())
    }

    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> JpipError {
        JpipError::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }
}
