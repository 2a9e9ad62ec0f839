//! # inproc
//!
//! In-process cache client built on [`heapcache::LruCache`].
//!
//! - [`InprocCacheClient`]: TTL entries, stale-aware lookups, purge
//! - [`CacheStats`]: hit/miss/eviction counters
//! - [`AsyncCacheProcessor`]: the same operations, answered through
//!   [`deferred::Deferred`] results computed on a tokio blocking pool

#![warn(missing_docs)]

mod client;
mod processor;
mod stats;

pub use client::{Entry, InprocCacheClient};
pub use processor::{AsyncCacheProcessor, ABANDONED_KIND};
pub use stats::{CacheStats, StatsSnapshot};
