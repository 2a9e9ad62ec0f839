//! Error types shared by the cache and the deferred result

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error kinds surfaced by cache lookups and deferred results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key not present (expected condition, not a failure)
    Miss,

    /// Operation was cancelled before it started running
    Cancelled,

    /// Blocking wait ran out of time; the operation may still complete
    Timeout,

    /// The producer failed; replayed verbatim to every consumer
    Exception(Exception),
}

impl CacheError {
    /// True for the "key not found" kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Miss)
    }

    /// True if the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        match self {
            CacheError::Cancelled => true,
            CacheError::Exception(exc) => exc.is_cancellation(),
            _ => false,
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Miss => write!(f, "Cache miss"),
            CacheError::Cancelled => write!(f, "Operation cancelled"),
            CacheError::Timeout => write!(f, "Timed out waiting for result"),
            CacheError::Exception(exc) => write!(f, "{}", exc),
        }
    }
}

impl StdError for CacheError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CacheError::Exception(exc) => Some(exc),
            _ => None,
        }
    }
}

impl From<Exception> for CacheError {
    fn from(exc: Exception) -> Self {
        if exc.is_cancellation() {
            CacheError::Cancelled
        } else {
            CacheError::Exception(exc)
        }
    }
}

impl From<CacheError> for io::Error {
    fn from(err: CacheError) -> Self {
        let kind = match err {
            CacheError::Miss => io::ErrorKind::NotFound,
            CacheError::Timeout => io::ErrorKind::TimedOut,
            CacheError::Cancelled => io::ErrorKind::Interrupted,
            CacheError::Exception(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Captured producer failure.
///
/// Holds the failure's type label, its message and the rendered `source()`
/// chain, so every consumer sees the same classification. Cancellation is a
/// separate tag that only [`Exception::cancelled`] sets; the kind label alone
/// never makes an exception a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    kind: String,
    message: String,
    trace: Option<String>,
    cancelled: bool,
}

/// Kind label used for the outcome of a honored cancellation
pub const CANCELLED_KIND: &str = "Cancelled";

impl Exception {
    /// Create an exception from its parts
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
            cancelled: false,
        }
    }

    /// Attach a trace
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Capture an error value, recording its type name and source chain
    pub fn from_error<E: StdError + ?Sized>(err: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            trace: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\ncaused by: "))
            },
            cancelled: false,
        }
    }

    /// Capture a panic payload as returned by `catch_unwind`
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new("panic", message)
    }

    /// The exception that marks a cancelled operation
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::new(CANCELLED_KIND, "operation cancelled before it started")
        }
    }

    /// Type label
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rendered cause chain, if any
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// True if this exception represents a cancellation
    pub fn is_cancellation(&self) -> bool {
        self.cancelled
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(trace) = &self.trace {
            write!(f, "\ncaused by: {}", trace)?;
        }
        Ok(())
    }
}

impl StdError for Exception {}

/// Error returned when internal cache invariants are violated.
///
/// Produced by [`LruCache::check_invariants`](crate::LruCache::check_invariants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Create a new error with the given description
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// The error description
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for InvariantError {}
