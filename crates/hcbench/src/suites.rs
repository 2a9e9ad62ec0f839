//! Benchmark catalogue

use std::hint::black_box;
use std::time::Duration;

use deferred::{Deferred, Outcome};
use heapcache::LruCache;
use inproc::InprocCacheClient;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::harness::{Benchmark, Limits, Workload};

const DAY: Duration = Duration::from_secs(86_400);
const SIZES: [u64; 2] = [100, 10_000];

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(0x5eed)
}

struct InprocPut {
    client: InprocCacheClient<u64, u64>,
    rng: SmallRng,
}

impl Workload for InprocPut {
    fn call(&mut self) {
        let key = self.rng.random::<u64>();
        self.client.put(key, 5, Duration::from_secs(60));
    }

    fn calibrate(&mut self) {
        black_box(self.rng.random::<u64>());
    }
}

/// Prefilled client; `span` is the key range drawn from (2x size for contains)
struct InprocLookup {
    client: InprocCacheClient<u64, u64>,
    rng: SmallRng,
    span: u64,
    contains: bool,
}

impl InprocLookup {
    fn new(size: u64, contains: bool) -> Self {
        let client = InprocCacheClient::new(size as usize);
        if contains {
            // Half the probed keys are present.
            for k in (1..size * 2).step_by(2) {
                client.put(k, k, DAY);
            }
        } else {
            for k in 0..size {
                client.put(k, k, DAY);
            }
        }
        Self {
            client,
            rng: rng(),
            span: if contains { size * 2 } else { size },
            contains,
        }
    }
}

impl Workload for InprocLookup {
    fn call(&mut self) {
        let key = self.rng.random_range(0..self.span);
        if self.contains {
            black_box(self.client.contains(&key, None));
        } else {
            black_box(self.client.get_or(&key, 0));
        }
    }

    fn calibrate(&mut self) {
        black_box(self.rng.random_range(0..self.span));
    }
}

struct LruTouch {
    cache: LruCache<u64, u64>,
    rng: SmallRng,
    span: u64,
}

impl Workload for LruTouch {
    fn call(&mut self) {
        let key = self.rng.random_range(0..self.span);
        black_box(self.cache.get(&key));
    }

    fn calibrate(&mut self) {
        black_box(self.rng.random_range(0..self.span));
    }
}

enum DeferredOp {
    Result,
    ResultZeroTimeout,
    PendingTimeout,
    Cancelled,
    Complete,
}

struct DeferredWorkload {
    op: DeferredOp,
    deferred: Deferred<u64>,
}

impl DeferredWorkload {
    fn new(op: DeferredOp) -> Self {
        let deferred = Deferred::new();
        match op {
            DeferredOp::Result | DeferredOp::ResultZeroTimeout => {
                deferred.complete_value(3);
            }
            DeferredOp::Cancelled => {
                deferred.cancel();
                deferred.set_running_or_notify_cancelled();
            }
            DeferredOp::PendingTimeout | DeferredOp::Complete => {}
        }
        Self { op, deferred }
    }
}

impl Workload for DeferredWorkload {
    fn call(&mut self) {
        match self.op {
            DeferredOp::Result | DeferredOp::Cancelled => {
                let _ = black_box(self.deferred.result(None));
            }
            DeferredOp::ResultZeroTimeout | DeferredOp::PendingTimeout => {
                let _ = black_box(self.deferred.result(Some(Duration::ZERO)));
            }
            DeferredOp::Complete => {
                let deferred = Deferred::completed(Outcome::Value(3u64));
                black_box(deferred);
            }
        }
    }

    fn calibrate(&mut self) {
        if let DeferredOp::Complete = self.op {
            black_box(Deferred::<u64>::new());
        }
    }
}

fn deferred_bench(name: &str, description: &str, make: fn() -> DeferredOp) -> Benchmark {
    Benchmark::new(
        name,
        description,
        Box::new(move || Box::new(DeferredWorkload::new(make())) as Box<dyn Workload>),
    )
    .with_limits(Limits {
        initial: 10_000,
        calibration_runs: 1_000_000,
        max_loops: 10,
        max_runs: 10_000_000,
    })
}

/// Every registered benchmark, in run order
pub fn all() -> Vec<Benchmark> {
    let mut benches = Vec::new();

    for size in SIZES {
        benches.push(Benchmark::new(
            format!("inproc.put.lru.sz{}", size),
            "InprocCacheClient::put with random keys",
            Box::new(move || {
                Box::new(InprocPut {
                    client: InprocCacheClient::new(size as usize),
                    rng: rng(),
                }) as Box<dyn Workload>
            }),
        ));
        benches.push(Benchmark::new(
            format!("inproc.get.lru.sz{}", size),
            "InprocCacheClient::get_or on a full cache",
            Box::new(move || Box::new(InprocLookup::new(size, false)) as Box<dyn Workload>),
        ));
        benches.push(Benchmark::new(
            format!("inproc.contains.lru.sz{}", size),
            "InprocCacheClient::contains, half hits",
            Box::new(move || Box::new(InprocLookup::new(size, true)) as Box<dyn Workload>),
        ));
        benches.push(Benchmark::new(
            format!("heapcache.get.sz{}", size),
            "LruCache::get with touch",
            Box::new(move || {
                let cache = LruCache::new(size as usize);
                for k in 0..size {
                    cache.set(k, k);
                }
                Box::new(LruTouch {
                    cache,
                    rng: rng(),
                    span: size,
                }) as Box<dyn Workload>
            }),
        ));
    }

    benches.push(deferred_bench("deferred.result", "Deferred::result on a value", || {
        DeferredOp::Result
    }));
    benches.push(deferred_bench(
        "deferred.result.wtimeout",
        "Deferred::result with zero timeout on a value",
        || DeferredOp::ResultZeroTimeout,
    ));
    benches.push(deferred_bench(
        "deferred.result.timeout",
        "Deferred::result zero timeout while pending",
        || DeferredOp::PendingTimeout,
    ));
    benches.push(deferred_bench(
        "deferred.result.cancelled",
        "Deferred::result after cancellation",
        || DeferredOp::Cancelled,
    ));
    benches.push(deferred_bench(
        "deferred.set",
        "Deferred creation and completion",
        || DeferredOp::Complete,
    ));

    benches
}

/// Benchmarks whose name starts with `prefix` (all of them for `None`)
pub fn select(benches: Vec<Benchmark>, prefix: Option<&str>) -> Vec<Benchmark> {
    benches
        .into_iter()
        .filter(|bench| prefix.map_or(true, |p| bench.name.starts_with(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let benches = all();
        let mut names: Vec<_> = benches.iter().map(|b| b.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), benches.len());
    }

    #[test]
    fn test_select_by_prefix() {
        let picked = select(all(), Some("deferred.result"));
        assert_eq!(picked.len(), 4);

        let picked = select(all(), Some("inproc.get"));
        assert_eq!(picked.len(), 2);
        assert_eq!(select(all(), None).len(), all().len());
    }

    #[test]
    fn test_workloads_run() {
        let mut lookup = InprocLookup::new(100, true);
        lookup.call();
        assert_eq!(lookup.client.len(), 100);

        let mut cancelled = DeferredWorkload::new(DeferredOp::Cancelled);
        cancelled.call();
        assert!(cancelled.deferred.cancelled());
    }
}
