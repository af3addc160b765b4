// SPDX-License-Identifier: MIT
// tooibox-jobs-demo: drives the job engine with a simulated frame loop.
//
// - Every frame submits a batch of background jobs and one foreground job.
// - The main thread pumps the foreground executor once per frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::info;

use tooibox_jobs::{Affinity, EngineConfig, JobEngine, SelectorKind};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON file with an engine configuration. Command line options override it.
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Number of worker threads (default: one per hardware thread)
    #[arg(long)]
    workers: Option<usize>,

    /// How background jobs are placed on workers
    #[arg(long, value_enum)]
    selector: Option<SelectorKind>,

    /// Seed for the random selector
    #[arg(long)]
    seed: Option<u64>,

    /// Number of frames to simulate
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Background jobs submitted per frame
    #[arg(long, default_value_t = 32)]
    jobs_per_frame: u32,

    /// Target frame time in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Upper bound for draining queued jobs at shutdown
    #[arg(long)]
    drain_timeout_ms: Option<u64>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.workers == Some(0) {
        return Err("--workers must be at least 1".into());
    }
    if args.frames == 0 {
        return Err("--frames must be at least 1".into());
    }
    if args.seed.is_some() && matches!(args.selector, Some(s) if s != SelectorKind::Random) {
        return Err("--seed only applies to the random selector".into());
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load engine config from {path}"))?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if let Some(selector) = args.selector {
        config.selector = selector;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(ms) = args.drain_timeout_ms {
        config.drain_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

// Stand-in for real work: a bit of arithmetic proportional to `n`.
fn simulate_work(n: u64) -> u64 {
    (0..n * 1000).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let config = build_config(&args)?;
    let engine = JobEngine::new(config).context("failed to start the job engine")?;
    info!("Starting frame loop with {} workers", engine.worker_count());

    let background_done = Arc::new(AtomicU64::new(0));
    let frame_time = Duration::from_millis(args.frame_ms);
    let mut foreground_ran = 0usize;

    for frame in 0..args.frames {
        let frame_start = Instant::now();

        for i in 0..args.jobs_per_frame {
            let done = background_done.clone();
            let handle = engine.submit_named(
                format!("frame {frame} job {i}"),
                Affinity::Worker,
                move || {
                    let checksum = simulate_work(u64::from(i % 8) + 1);
                    done.fetch_add(1, Ordering::Relaxed);
                    Ok(checksum)
                },
            )?;
            // nobody reads background results in this demo
            engine.release(handle);
        }

        let upload = engine.submit_named(
            format!("frame {frame} upload"),
            Affinity::Foreground,
            move || Ok(frame),
        )?;

        foreground_ran += engine.pump_foreground()?;
        let uploaded = engine.take_value::<u32>(upload)?;
        debug_assert_eq!(uploaded, frame);

        if let Some(rest) = frame_time.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let report = engine.shutdown();
    let per_worker: Vec<u64> = engine.workers().iter().map(|w| w.executed()).collect();
    info!(
        "Finished {} frames: {} background jobs, {} foreground jobs, per worker {:?}",
        args.frames,
        background_done.load(Ordering::Relaxed),
        foreground_ran,
        per_worker
    );
    info!(
        "Shutdown: {} drained, {} cancelled",
        report.drained, report.cancelled
    );
    Ok(())
}
