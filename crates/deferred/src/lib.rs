//! # deferred
//!
//! Thread-safe, single-assignment results for asynchronous cache operations.
//!
//! ## Outcome channels
//! - **Value**: the operation produced a value
//! - **Miss**: the key was not in the cache
//! - **Exception**: the producer failed or the operation was cancelled
//!
//! Completion is exactly-once (first writer wins). Observers run outside the
//! internal lock, so they may register further observers or complete other
//! results. Cancellation is cooperative: it only takes effect if the producer
//! checks [`Deferred::set_running_or_notify_cancelled`] before starting.

#![warn(missing_docs)]

mod deferred;
mod outcome;
mod promise;

pub use deferred::{Deferred, ErrorSink, Observer};
pub use outcome::Outcome;
pub use promise::Promise;
