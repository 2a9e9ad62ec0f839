//! AsyncCacheProcessor against a real tokio runtime

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use heapcache::CacheError;
use inproc::{AsyncCacheProcessor, InprocCacheClient, ABANDONED_KIND};
use tokio::runtime::{Builder, Runtime};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn runtime(blocking_threads: usize) -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(blocking_threads)
        .build()
        .unwrap()
}

#[test]
fn test_put_then_get() {
    let rt = runtime(4);
    let client = Arc::new(InprocCacheClient::new(16));
    let processor = AsyncCacheProcessor::new(Arc::clone(&client), rt.handle().clone());

    processor
        .put("key".to_string(), 42u32, Duration::from_secs(60))
        .result(WAIT)
        .unwrap();

    assert_eq!(processor.get("key".to_string()).result(WAIT), Ok(42));
    assert_eq!(processor.contains("key".to_string(), None).result(WAIT), Ok(true));
    assert_eq!(client.stats().inserts(), 1);
}

#[test]
fn test_miss_completes_as_miss() {
    let rt = runtime(2);
    let client: Arc<InprocCacheClient<u32, u32>> = Arc::new(InprocCacheClient::new(4));
    let processor = AsyncCacheProcessor::new(client, rt.handle().clone());

    let pending = processor.get(7);
    let (tx, rx) = mpsc::channel();
    pending.on_miss(move || tx.send(()).unwrap());

    assert_eq!(pending.result(WAIT), Err(CacheError::Miss));
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn test_panicking_job_completes_with_exception() {
    let rt = runtime(2);
    let client: Arc<InprocCacheClient<u32, u32>> = Arc::new(InprocCacheClient::new(4));
    let processor = AsyncCacheProcessor::new(client, rt.handle().clone());

    let failed = processor.submit(|_| -> heapcache::Result<u32> { panic!("backend exploded") });

    match failed.result(WAIT) {
        Err(CacheError::Exception(exc)) => assert_eq!(exc.message(), "backend exploded"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_cancelled_job_never_touches_cache() {
    // One blocking thread, so the second job queues behind the first.
    let rt = runtime(1);
    let client: Arc<InprocCacheClient<u32, u32>> = Arc::new(InprocCacheClient::new(4));
    let processor = AsyncCacheProcessor::new(Arc::clone(&client), rt.handle().clone());

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = processor.submit(move |_| {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        Ok(())
    });
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let queued = processor.put(1, 1, Duration::from_secs(60));
    assert!(queued.cancel());
    release_tx.send(()).unwrap();

    blocker.result(WAIT).unwrap();
    assert_eq!(queued.result(WAIT), Err(CacheError::Cancelled));
    assert!(queued.cancelled());
    assert!(!client.contains(&1, None));
}

#[test]
fn test_purge_reports_removed_count() {
    let rt = runtime(2);
    let client = Arc::new(InprocCacheClient::new(8));
    let processor = AsyncCacheProcessor::new(Arc::clone(&client), rt.handle().clone());

    client.put(1u32, 1u32, Duration::ZERO);
    client.put(2, 2, Duration::from_secs(60));
    std::thread::sleep(Duration::from_millis(10));

    assert_eq!(processor.purge(Duration::ZERO).result(WAIT), Ok(1));
    processor.clear().result(WAIT).unwrap();
    assert!(client.is_empty());
}

#[test]
fn test_job_dropped_by_shut_down_runtime_fails() {
    let rt = runtime(1);
    let handle = rt.handle().clone();
    drop(rt);

    let client: Arc<InprocCacheClient<u32, u32>> = Arc::new(InprocCacheClient::new(4));
    let processor = AsyncCacheProcessor::new(client, handle);

    let lost = processor.get(1);
    match lost.result(WAIT) {
        Err(CacheError::Exception(exc)) => assert_eq!(exc.kind(), ABANDONED_KIND),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(lost.done());
    assert!(!lost.cancelled());
}

#[test]
fn test_purge_runs_alongside_puts() {
    let rt = runtime(4);
    let client = Arc::new(InprocCacheClient::new(1_000));
    let processor = AsyncCacheProcessor::new(Arc::clone(&client), rt.handle().clone());

    for k in 0..1_000u32 {
        client.put(k, 0u32, Duration::ZERO);
    }
    let puts: Vec<_> = (0..1_000u32)
        .map(|k| processor.put(k, 1, Duration::from_secs(60)))
        .collect();
    let purges: Vec<_> = (0..8).map(|_| processor.purge(Duration::ZERO)).collect();

    for pending in puts {
        pending.result(WAIT).unwrap();
    }
    for pending in purges {
        pending.result(WAIT).unwrap();
    }
    for k in 0..1_000u32 {
        assert_eq!(client.get(&k), Ok(1));
    }
}
