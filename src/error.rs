use std::time::Duration;

use thiserror::Error;

use crate::response::Response;
use crate::timeout::TimeoutKind;

/// Result type for fetchx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fetchx
///
/// Every failed Transaction resolves to exactly one of these. Nothing in the
/// engine retries; the caller decides what to do with a failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The URL has an unsupported scheme, no host, or does not parse
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Name resolution produced no endpoints or the resolver failed
    #[error("Failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The resolve budget elapsed before resolution finished
    #[error("Name resolution timed out after {duration:?}")]
    ResolveTimeout { duration: Duration },

    /// Transport connect, TLS handshake or certificate failure
    #[error("Connection to {endpoint} failed: {cause}")]
    Connection {
        endpoint: String,
        #[source]
        cause: ConnectFailure,
    },

    /// No bytes arrived within the read budget
    #[error("Read timed out after {duration:?}")]
    ReadTimeout { duration: Duration },

    /// The whole Transaction outlived its total budget
    #[error("Request timed out after {duration:?}")]
    TotalTimeout { duration: Duration },

    /// The peer sent bytes that do not frame as an HTTP/1.x response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Transport failure after the connection was established
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request body source failed
    #[error("Body error: {0}")]
    Body(String),

    /// Redirect budget exhausted under [`RedirectLimitPolicy::Error`](crate::options::RedirectLimitPolicy)
    #[error("Redirect limit of {redirects} exceeded")]
    RedirectLimitExceeded {
        redirects: u32,
        response: Box<Response>,
    },

    /// Trust configuration could not be loaded
    #[error("SSL/TLS error: {0}")]
    Tls(String),

    /// Proxy errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The Transaction was torn down before it produced a result
    #[error("Request was cancelled")]
    Cancelled,
}

/// Why a transport could not be opened
#[derive(Error, Debug)]
pub enum ConnectFailure {
    #[error("connection refused")]
    Refused,

    #[error("connection reset")]
    Reset,

    #[error("connect timed out after {0:?}")]
    TimedOut(Duration),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("certificate invalid: {0}")]
    CertificateInvalid(String),

    #[error("{0}")]
    Io(std::io::Error),
}

impl ConnectFailure {
    /// Classify a raw transport error
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                ConnectFailure::Reset
            }
            _ => ConnectFailure::Io(err),
        }
    }
}

impl Error {
    /// Create a new invalid URL error
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Error::InvalidUrl(message.into())
    }

    /// Create a new resolution error
    pub fn resolution(host: impl Into<String>, source: std::io::Error) -> Self {
        Error::Resolution {
            host: host.into(),
            source,
        }
    }

    /// Create a new connection error
    pub fn connection(endpoint: impl ToString, cause: ConnectFailure) -> Self {
        Error::Connection {
            endpoint: endpoint.to_string(),
            cause,
        }
    }

    /// Create the timeout error matching `kind`
    pub fn timeout(kind: TimeoutKind, duration: Duration) -> Self {
        match kind {
            TimeoutKind::Resolve => Error::ResolveTimeout { duration },
            TimeoutKind::Read => Error::ReadTimeout { duration },
            TimeoutKind::Total => Error::TotalTimeout { duration },
        }
    }

    /// Create a new malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedResponse(message.into())
    }

    /// Create a new body error
    pub fn body(message: impl Into<String>) -> Self {
        Error::Body(message.into())
    }

    /// Create a new TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Error::Tls(message.into())
    }

    /// Create a new proxy error
    pub fn proxy(message: impl Into<String>) -> Self {
        Error::Proxy(message.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Which timer fired, if this is a timeout
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Error::ResolveTimeout { .. } => Some(TimeoutKind::Resolve),
            Error::ReadTimeout { .. } => Some(TimeoutKind::Read),
            Error::TotalTimeout { .. } => Some(TimeoutKind::Total),
            _ => None,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        self.timeout_kind().is_some()
    }

    /// Check if this is a connection error
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Check if this is a resolution error
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::Resolution { .. })
    }

    /// Check if the peer certificate was rejected
    pub fn is_certificate(&self) -> bool {
        matches!(
            self,
            Error::Connection {
                cause: ConnectFailure::CertificateInvalid(_),
                ..
            }
        )
    }

    /// Check if this is a malformed response error
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedResponse(_))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
