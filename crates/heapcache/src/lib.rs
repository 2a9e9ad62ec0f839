//! # heapcache
//!
//! Bounded in-memory key-value store with least-recently-used eviction.
//!
//! ## Architecture
//! - **Arena**: dense `Vec` of nodes, addressed by slot
//! - **Heap**: binary min-heap of slots ordered by recency stamp (root = LRU)
//! - **Index**: AHash map from key to slot (O(1) lookup)
//! - **Locking**: one mutex per cache, held for a single logical operation
//!
//! Touch, insert and delete are O(log n); eviction picks the root in O(1).
//!
//! The [`CacheError`] taxonomy defined here is shared with the deferred
//! result and the in-process client crates.

#![warn(missing_docs)]

mod error;
mod lru;
mod node;

pub use error::{CacheError, Exception, InvariantError, Result, CANCELLED_KIND};
pub use lru::{EvictionCallback, LruCache};
