use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL was empty
    Empty,
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
}

/// Broad error classes used by the service facade to decide what to absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programmer mistake; always surfaces
    Usage,
    /// Client-side rate limit denied admission; always surfaces
    RateLimit,
    /// Response status was not acceptable for the requested operation
    HttpStatus,
    /// I/O or protocol failure raised by the transport
    Transport,
}

/// Invocation error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InvokeError {
    /// API misuse: body on a non-enclosing verb, consumed handle, bad limits, ...
    #[error("{0}")]
    Usage(String),

    /// Invalid URL (failed to parse or unusable as a request target)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Unsupported URL scheme
    #[error("URL scheme '{scheme}' not supported: only http and https are allowed")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
    },

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Admission denied by the per-host rate limit
    #[error("Host is at its limit: {host}")]
    RateLimited { host: String },

    /// Response status is not acceptable (e.g. writing a 4xx body to a file)
    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    /// Transport error (network, connection, protocol, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Connect or socket timeout elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Local I/O error (reading a body source, writing a file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request was aborted through its [`AbortHandle`](crate::AbortHandle)
    #[error("Request aborted")]
    Aborted,

    /// Redirect could not be followed (circular, too many, malformed location)
    #[error("Redirect error: {0}")]
    Redirect(String),
}

impl InvokeError {
    /// Shorthand for a [`InvokeError::Usage`] error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Wrap an arbitrary error as a transport failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transport(err.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_)
            | Self::InvalidUri { .. }
            | Self::InvalidScheme { .. }
            | Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_) => ErrorKind::Usage,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::Tls(_)
            | Self::Io(_)
            | Self::Aborted
            | Self::Redirect(_) => ErrorKind::Transport,
        }
    }

    /// Whether the silent facade methods may swallow this error.
    #[must_use]
    pub fn is_absorbable(&self) -> bool {
        matches!(self.kind(), ErrorKind::HttpStatus | ErrorKind::Transport)
    }

    /// Recover an error that crossed a `std::io::Read` boundary.
    ///
    /// Body readers wrap timeouts and aborts as `io::Error::other(InvokeError)`;
    /// those come back as the original variant, anything else becomes [`InvokeError::Io`].
    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<InvokeError>()) {
            return InvokeError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<InvokeError>()) {
            Some(Ok(invoke)) => *invoke,
            Some(Err(other)) => InvokeError::Io(std::io::Error::other(other)),
            None => InvokeError::Io(std::io::Error::other("I/O error")),
        }
    }
}

impl From<hyper::Error> for InvokeError {
    fn from(err: hyper::Error) -> Self {
        InvokeError::Transport(Box::new(err))
    }
}

impl From<http::Error> for InvokeError {
    fn from(err: http::Error) -> Self {
        InvokeError::Usage(format!("Failed to build request: {err}"))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = InvokeError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("transport error should have a source");
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.map(|e| e.0), Some("connection refused"));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(InvokeError::usage("x").kind(), ErrorKind::Usage);
        assert_eq!(
            InvokeError::RateLimited {
                host: "example.com".to_owned()
            }
            .kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            InvokeError::HttpStatus {
                status: 404,
                reason: "Not Found".to_owned()
            }
            .kind(),
            ErrorKind::HttpStatus
        );
        assert_eq!(InvokeError::Aborted.kind(), ErrorKind::Transport);
        assert_eq!(
            InvokeError::Io(std::io::Error::other("disk full")).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_absorbable() {
        assert!(InvokeError::transport("boom").is_absorbable());
        assert!(InvokeError::Timeout(Duration::from_secs(1)).is_absorbable());
        assert!(
            InvokeError::HttpStatus {
                status: 500,
                reason: String::new()
            }
            .is_absorbable()
        );
        assert!(!InvokeError::usage("bad").is_absorbable());
        assert!(
            !InvokeError::RateLimited {
                host: "h".to_owned()
            }
            .is_absorbable()
        );
    }

    #[test]
    fn test_rate_limited_message_names_host() {
        let err = InvokeError::RateLimited {
            host: "localhost".to_owned(),
        };
        assert_eq!(err.to_string(), "Host is at its limit: localhost");
    }

    #[test]
    fn test_from_io_recovers_wrapped_error() {
        let wrapped = std::io::Error::other(InvokeError::Aborted);
        assert!(matches!(InvokeError::from_io(wrapped), InvokeError::Aborted));

        let plain = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(InvokeError::from_io(plain), InvokeError::Io(_)));
    }
}
