//! Bridges from a deferred result into conventional single-value promises

use std::sync::mpsc;

use heapcache::{CacheError, Result};
use tokio::sync::oneshot;

/// A consumer that accepts exactly one success value or one failure.
///
/// Used by [`Deferred::chain_to_standard`](crate::Deferred::chain_to_standard):
/// values go to `set_result`, misses arrive as [`CacheError::Miss`] and
/// producer failures as the unwrapped exception.
pub trait Promise<T> {
    /// Deliver the success value
    fn set_result(self, value: T);

    /// Deliver the failure
    fn set_exception(self, err: CacheError);
}

impl<T> Promise<T> for oneshot::Sender<Result<T>> {
    fn set_result(self, value: T) {
        // A dropped receiver means nobody is waiting any more.
        let _ = self.send(Ok(value));
    }

    fn set_exception(self, err: CacheError) {
        let _ = self.send(Err(err));
    }
}

impl<T> Promise<T> for mpsc::Sender<Result<T>> {
    fn set_result(self, value: T) {
        let _ = self.send(Ok(value));
    }

    fn set_exception(self, err: CacheError) {
        let _ = self.send(Err(err));
    }
}
