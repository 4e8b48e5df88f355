//! Single-run and sweep drivers: wire the pipeline, spawn threads, report.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::affinity::{self, AffinityPlanner};
use crate::config::RunConfig;
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::error::RunError;
use crate::pipeline::Pipeline;
use crate::recorder::{RecorderStats, TimingRecorder};
use crate::stats::StageSummary;
use crate::worker::{WorkerPool, WorkerSettings};

/// Aggregated results of a single run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub workers: usize,
    pub tasks_total: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_ms: f64,
    pub throughput: f64,
    pub stages: StageSummary,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
    pub dispatcher: DispatcherStats,
    pub recorder: RecorderStats,
}

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    use libc::{RUSAGE_SELF, getrusage, rusage};
    // SAFETY: rusage is plain old data; getrusage fills it in.
    let mut usage: rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { getrusage(RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((secs(usage.ru_utime), secs(usage.ru_stime)))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Execute one run: dispatcher plus worker pool until every worker finishes.
pub fn run(config: &RunConfig) -> Result<RunSummary, RunError> {
    let available = affinity::available_cores();
    config.validate(available)?;

    let recorder = TimingRecorder::create(&config.out_dir)?;
    let pipeline = Arc::new(Pipeline::new(config.queue_capacity, recorder));
    let planner = AffinityPlanner::new(available, config.dispatcher_core);
    let placement = config.placement;
    info!(
        workers = config.workers,
        tasks_per_worker = config.tasks_per_worker,
        capacity = config.queue_capacity,
        cores = available,
        ?placement,
        "starting run"
    );

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();

    let dispatcher = {
        let pipeline = Arc::clone(&pipeline);
        let core = planner.dispatcher_core();
        let compute_latency = config.compute_latency;
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || {
                placement.apply(core);
                Dispatcher::new(pipeline, compute_latency).run()
            })
            .map_err(|source| RunError::Spawn {
                name: "dispatcher".to_string(),
                source,
            })?
    };

    let settings = WorkerSettings {
        tasks: config.tasks_per_worker,
        pre_latency: config.pre_latency,
        post_latency: config.post_latency,
        payload_len: config.payload_len,
        await_timeout: config.await_timeout,
        submit_mode: config.submit_mode,
    };
    let reports = WorkerPool::spawn(config.workers, &pipeline, settings, &planner, placement)
        .and_then(WorkerPool::join);

    // Workers are done (or gone); let the dispatcher drain and exit.
    pipeline.shutdown();
    let dispatcher = dispatcher.join().map_err(|_| RunError::Panicked {
        name: "dispatcher".to_string(),
    })?;
    let reports = reports?;
    let leftover = pipeline.queue.len();
    if leftover > 0 {
        warn!(leftover, "tasks left in queue after shutdown");
    }
    for report in &reports {
        debug!(
            worker = report.worker,
            completed = report.completed,
            failed = report.failed,
            "worker finished"
        );
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let recorder = pipeline.recorder.finish();
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    let completed: usize = reports.iter().map(|r| r.completed).sum();
    let failed: usize = reports.iter().map(|r| r.failed).sum();
    let stages = StageSummary::from_samples(reports.iter().flat_map(|r| &r.samples));
    let throughput = if elapsed_ms > 0.0 {
        completed as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    info!(completed, failed, elapsed_ms, "run finished");

    Ok(RunSummary {
        workers: config.workers,
        tasks_total: config.total_tasks(),
        completed,
        failed,
        elapsed_ms,
        throughput,
        stages,
        cpu_user_s,
        cpu_sys_s,
        dispatcher,
        recorder,
    })
}

fn fmt_cpu(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "NA".to_string())
}

/// Print the human-readable summary block for a single run.
pub fn print_summary(summary: &RunSummary) {
    let m = &summary.stages.mean;
    println!("RUN SUMMARY");
    println!(
        "workers={} tasks_total={} completed={} failed={}",
        summary.workers, summary.tasks_total, summary.completed, summary.failed
    );
    println!(
        "elapsed_ms={:.2} throughput_tasks_per_s={:.2}",
        summary.elapsed_ms, summary.throughput
    );
    println!(
        "samples={} mean_ms pre={:.3} queue_wait={:.3} compute={:.3} delivery={:.3} post={:.3} round_trip={:.3}",
        summary.stages.samples,
        m.pre_ms, m.queue_wait_ms, m.compute_ms, m.delivery_ms, m.post_ms, m.round_trip_ms
    );
    println!(
        "cpu_user_s={} cpu_sys_s={}",
        fmt_cpu(summary.cpu_user_s),
        fmt_cpu(summary.cpu_sys_s)
    );
    println!(
        "dispatched={} delivered={} discarded={} stale={}",
        summary.dispatcher.processed,
        summary.dispatcher.delivered,
        summary.dispatcher.discarded,
        summary.dispatcher.stale
    );
    println!(
        "dispatch_rows={} worker_rows={} dropped_rows={}",
        summary.recorder.dispatch_rows, summary.recorder.worker_rows, summary.recorder.dropped_rows
    );
}

const SWEEP_HEADER: &str = "workers,tasks_total,completed,failed,elapsed_ms,throughput_tasks_per_s,mean_queue_wait_ms,mean_compute_ms,mean_delivery_ms,mean_round_trip_ms,cpu_user_s,cpu_sys_s";

/// Run once per worker count and print one CSV line per run.
///
/// Each run writes its timing logs into `out_dir/w{workers}`.
pub fn run_sweep(base: &RunConfig, worker_sets: &[usize]) -> Result<Vec<RunSummary>, RunError> {
    println!("{SWEEP_HEADER}");
    let mut summaries = Vec::with_capacity(worker_sets.len());
    for &workers in worker_sets {
        let out_dir = base.out_dir.join(format!("w{workers}"));
        fs::create_dir_all(&out_dir).map_err(|source| RunError::LogOpen {
            path: out_dir.display().to_string(),
            source,
        })?;
        let config = RunConfig {
            workers,
            out_dir,
            ..base.clone()
        };
        let summary = run(&config)?;
        let m = &summary.stages.mean;
        println!(
            "{},{},{},{},{:.2},{:.2},{:.3},{:.3},{:.3},{:.3},{},{}",
            summary.workers,
            summary.tasks_total,
            summary.completed,
            summary.failed,
            summary.elapsed_ms,
            summary.throughput,
            m.queue_wait_ms,
            m.compute_ms,
            m.delivery_ms,
            m.round_trip_ms,
            fmt_cpu(summary.cpu_user_s),
            fmt_cpu(summary.cpu_sys_s)
        );
        if summary.failed > 0 {
            eprintln!("# warning,failed_tasks,{}", summary.failed);
        }
        summaries.push(summary);
    }
    Ok(summaries)
}
