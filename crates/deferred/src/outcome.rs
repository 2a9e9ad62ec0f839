//! Terminal outcome of a deferred result

use heapcache::{CacheError, Exception, Result};

/// Classified outcome. A pending result has no outcome yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Operation produced a value
    Value(T),

    /// Key was not present
    Miss,

    /// Producer failed, or the operation was cancelled
    Exception(Exception),
}

impl<T> Outcome<T> {
    /// True for `Value`
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    /// True for `Miss`
    pub fn is_miss(&self) -> bool {
        matches!(self, Outcome::Miss)
    }

    /// True for `Exception`, including cancellation
    pub fn is_exception(&self) -> bool {
        matches!(self, Outcome::Exception(_))
    }

    /// True if this outcome records a honored cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Exception(exc) if exc.is_cancellation())
    }

    /// Borrowing view as a `Result`
    pub fn as_result(&self) -> Result<&T> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Miss => Err(CacheError::Miss),
            Outcome::Exception(exc) => Err(exc.clone().into()),
        }
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Miss => Err(CacheError::Miss),
            Outcome::Exception(exc) => Err(exc.into()),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(CacheError::Miss) => Outcome::Miss,
            Err(CacheError::Cancelled) => Outcome::Exception(Exception::cancelled()),
            Err(CacheError::Timeout) => {
                Outcome::Exception(Exception::new("Timeout", "timed out waiting for result"))
            }
            Err(CacheError::Exception(exc)) => Outcome::Exception(exc),
        }
    }
}
