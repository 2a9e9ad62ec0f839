//! Adaptive timing loop
//!
//! Every series builds a fresh workload, measures the per-call overhead of
//! its calibration closure, then runs growing batches of calls until the
//! accumulated (overhead-corrected) time reaches the runtime target.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// One benchmarked operation plus its loop overhead baseline
pub trait Workload {
    /// The measured operation
    fn call(&mut self);

    /// Everything `call` does except the operation itself
    fn calibrate(&mut self) {}
}

/// Builds a fresh workload for each series
pub type Setup = Box<dyn Fn() -> Box<dyn Workload>>;

/// Loop sizing knobs, per benchmark
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub initial: u64,
    pub calibration_runs: u64,
    pub max_loops: usize,
    pub max_runs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            initial: 1_000,
            calibration_runs: 100_000,
            max_loops: 10,
            max_runs: 1_000_000,
        }
    }
}

/// Run-wide settings from the command line
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub series: usize,
    pub warmup: usize,
    pub runtime: Duration,
    pub verbose: bool,
}

/// A named benchmark
pub struct Benchmark {
    pub name: String,
    pub description: String,
    pub limits: Limits,
    setup: Setup,
}

/// Per-call timing statistics, in seconds
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub name: String,
    pub description: String,
    pub samples: usize,
    pub total_runs: u64,
    pub avg: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
}

impl Benchmark {
    pub fn new(name: impl Into<String>, description: impl Into<String>, setup: Setup) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            limits: Limits::default(),
            setup,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn run(&self, config: &RunConfig) -> Report {
        let limits = self.limits;
        let runtime = config.runtime.as_secs_f64();
        let max_overhead = config.runtime * 10;

        let mut per_call = Vec::new();
        let mut total_runs = 0u64;

        for series in 0..config.series + config.warmup {
            let mut workload = (self.setup)();

            let calibration = time_calls(limits.calibration_runs, || workload.calibrate())
                / limits.calibration_runs as f64;
            if config.verbose && series == 0 {
                info!(bench = %self.name, overhead = %pretty_time(calibration), "per run overhead");
            }

            let mut times = Vec::new();
            let mut runs = Vec::new();
            let mut current = limits.initial;
            let started = Instant::now();

            for _ in 0..limits.max_loops {
                let elapsed = time_calls(current, || workload.call());
                times.push((elapsed - calibration * current as f64).max(0.0));
                runs.push(current);

                let total_time: f64 = times.iter().sum();
                if total_time >= runtime || started.elapsed() > max_overhead {
                    break;
                }

                let done_runs: u64 = runs.iter().sum();
                current = if total_time <= 0.0 {
                    // Calibration swallowed the whole measurement.
                    current.saturating_mul(2)
                } else {
                    let per_run = total_time / done_runs as f64;
                    ((runtime - total_time) / per_run) as u64
                };
                current = current.clamp(limits.initial, limits.max_runs);
            }

            let series_runs: u64 = runs.iter().sum();
            let series_time: f64 = times.iter().sum();
            let warmup = series < config.warmup;
            if !warmup {
                total_runs += series_runs;
                per_call.extend(times.iter().zip(&runs).map(|(t, r)| t / *r as f64));
            }

            if config.verbose {
                info!(
                    bench = %self.name,
                    runs = series_runs,
                    elapsed = %pretty_time(series_time),
                    per_call = %pretty_time(series_time / series_runs.max(1) as f64),
                    warmup,
                    "series finished"
                );
            }
        }

        summarize(&self.name, &self.description, total_runs, &per_call)
    }
}

fn time_calls<F: FnMut()>(runs: u64, mut f: F) -> f64 {
    let start = Instant::now();
    for _ in 0..runs {
        f();
    }
    start.elapsed().as_secs_f64()
}

fn summarize(name: &str, description: &str, total_runs: u64, samples: &[f64]) -> Report {
    let count = samples.len().max(1) as f64;
    let avg = samples.iter().sum::<f64>() / count;
    let variance = samples.iter().map(|s| (s - avg) * (s - avg)).sum::<f64>() / count;

    Report {
        name: name.to_string(),
        description: description.to_string(),
        samples: samples.len(),
        total_runs,
        avg,
        max: samples.iter().copied().fold(0.0, f64::max),
        min: samples.iter().copied().reduce(f64::min).unwrap_or(0.0),
        std: variance.sqrt(),
    }
}

/// Render seconds with a readable unit
pub fn pretty_time(seconds: f64) -> String {
    if seconds >= 1.0 {
        format!("{:.2}s", seconds)
    } else if seconds >= 1e-3 {
        format!("{:.2}ms", seconds * 1e3)
    } else if seconds >= 1e-6 {
        format!("{:.2}us", seconds * 1e6)
    } else {
        format!("{:.2}ns", seconds * 1e9)
    }
}
