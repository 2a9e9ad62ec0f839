//! HeapCache benchmark runner

mod harness;
mod suites;

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use crate::harness::{pretty_time, Report, RunConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// List available benchmarks instead of running them
    #[arg(short, long)]
    list: bool,

    /// Measured series per benchmark
    #[arg(short = 'S', long, default_value_t = 10)]
    series: usize,

    /// Unmeasured warmup series per benchmark
    #[arg(long, default_value_t = 1)]
    warmup: usize,

    /// Target calibrated runtime of each series, in seconds
    #[arg(short = 'T', long, default_value_t = 5.0)]
    runtime: f64,

    /// Only run benchmarks whose name starts with this prefix
    #[arg(short = 's', long)]
    bench_suite: Option<String>,

    /// Log per-series progress
    #[arg(short, long)]
    verbose: bool,

    /// Print reports as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.series == 0 {
        bail!("--series must be at least 1");
    }
    if !args.runtime.is_finite() || args.runtime <= 0.0 {
        bail!("--runtime must be a positive number of seconds");
    }

    let benches = suites::select(suites::all(), args.bench_suite.as_deref());
    if benches.is_empty() {
        bail!(
            "no benchmark matches prefix {:?}",
            args.bench_suite.unwrap_or_default()
        );
    }

    if args.list {
        for bench in &benches {
            println!("{} - {}", bench.name, bench.description);
        }
        return Ok(());
    }

    let config = RunConfig {
        series: args.series,
        warmup: args.warmup,
        runtime: Duration::from_secs_f64(args.runtime),
        verbose: args.verbose,
    };
    info!(
        "Running {} benchmark(s), {} series of {:.1}s each",
        benches.len(),
        config.series,
        args.runtime
    );

    for bench in &benches {
        let report = bench.run(&config);
        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_report(&report);
        }
    }

    Ok(())
}

fn print_report(report: &Report) {
    println!("--- {} - {} ---", report.name, report.description);
    println!("  avg: {}", pretty_time(report.avg));
    println!("  max: {}", pretty_time(report.max));
    println!("  min: {}", pretty_time(report.min));
    println!("  std: {}", pretty_time(report.std));
}
