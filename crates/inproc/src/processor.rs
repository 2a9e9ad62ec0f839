//! Asynchronous access to an in-process client
//!
//! Each call queues the operation on a tokio runtime's blocking pool and
//! returns a [`Deferred`] right away. The job checks for cancellation before
//! touching the cache.

use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use deferred::{Deferred, Outcome};
use heapcache::{Exception, Result};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::client::InprocCacheClient;

/// Kind label of the failure recorded for a job the runtime dropped unrun
pub const ABANDONED_KIND: &str = "Abandoned";

/// Producer side of a queued job. Dropping it before completion, e.g. when
/// the runtime shuts down with the job still queued, fails the result.
struct Producer<R: Send + Sync + 'static>(Deferred<R>);

impl<R: Send + Sync + 'static> Drop for Producer<R> {
    fn drop(&mut self) {
        let abandoned = Exception::new(ABANDONED_KIND, "cache operation dropped before it ran");
        if self.0.complete_exception(abandoned) {
            warn!("cache operation dropped before it ran");
        }
    }
}

/// Runs cache operations off the caller's thread
pub struct AsyncCacheProcessor<K, V> {
    client: Arc<InprocCacheClient<K, V>>,
    runtime: Handle,
}

impl<K, V> AsyncCacheProcessor<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `client`, running jobs on `runtime`'s blocking pool
    pub fn new(client: Arc<InprocCacheClient<K, V>>, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    /// The wrapped client
    pub fn client(&self) -> &Arc<InprocCacheClient<K, V>> {
        &self.client
    }

    /// Queue an arbitrary operation against the client.
    ///
    /// `Err(Miss)` completes the result as a miss; other errors and panics
    /// complete it with an exception.
    pub fn submit<R, F>(&self, action: F) -> Deferred<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&InprocCacheClient<K, V>) -> Result<R> + Send + 'static,
    {
        let deferred = Deferred::new();
        let producer = Producer(deferred.clone());
        let client = Arc::clone(&self.client);

        self.runtime.spawn_blocking(move || {
            if !producer.0.set_running_or_notify_cancelled() {
                debug!("skipping cancelled cache operation");
                return;
            }

            let outcome = match catch_unwind(AssertUnwindSafe(|| action(&client))) {
                Ok(result) => Outcome::from(result),
                Err(payload) => {
                    let exc = Exception::from_panic(payload.as_ref());
                    warn!(error = %exc, "background cache operation failed");
                    Outcome::Exception(exc)
                }
            };
            producer.0.complete(outcome);
        });

        deferred
    }

    /// Fresh value for `key`, or a miss
    pub fn get(&self, key: K) -> Deferred<V> {
        self.submit(move |client| client.get(&key))
    }

    /// Whether `key` has a fresh entry outliving `margin`
    pub fn contains(&self, key: K, margin: Option<Duration>) -> Deferred<bool> {
        self.submit(move |client| Ok(client.contains(&key, margin)))
    }

    /// Store a value
    pub fn put(&self, key: K, value: V, ttl: Duration) -> Deferred<()> {
        self.submit(move |client| {
            client.put(key, value, ttl);
            Ok(())
        })
    }

    /// Remove a key
    pub fn delete(&self, key: K) -> Deferred<()> {
        self.submit(move |client| {
            client.delete(&key);
            Ok(())
        })
    }

    /// Drop every entry
    pub fn clear(&self) -> Deferred<()> {
        self.submit(|client| {
            client.clear();
            Ok(())
        })
    }

    /// Purge entries stale for longer than `timeout`; yields how many went
    pub fn purge(&self, timeout: Duration) -> Deferred<usize> {
        self.submit(move |client| Ok(client.purge(timeout).len()))
    }
}
