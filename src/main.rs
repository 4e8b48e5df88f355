mod affinity;
mod clock;
mod config;
mod dispatcher;
mod error;
mod logging;
mod pipeline;
mod recorder;
mod registry;
mod runner;
mod stats;
mod task_queue;
mod types;
mod worker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::affinity::CorePlacement;
use crate::config::{
    DEFAULT_COMPUTE_US, DEFAULT_PAYLOAD_LEN, DEFAULT_QUEUE_CAPACITY, DEFAULT_STAGE_US,
    DEFAULT_TASKS_PER_WORKER, DEFAULT_WORKERS, RunConfig, SubmitMode,
};
use crate::error::{ConfigError, RunError};

/// Dedicated-accelerator dispatch simulator: one pinned dispatcher thread
/// serving a pool of pinned worker threads, with per-stage timing logs.
#[derive(Debug, Parser)]
#[command(name = "accel_dispatch", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Single run (the default when no subcommand is given). Flags go after
    /// the subcommand name.
    Run(RunArgs),
    /// One run per worker count, summarised as CSV on stdout.
    Sweep(SweepArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Queue (and completion registry) capacity.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    #[arg(long, default_value_t = DEFAULT_TASKS_PER_WORKER)]
    tasks_per_worker: usize,

    /// Simulated accelerator latency per task, in microseconds.
    #[arg(long, default_value_t = DEFAULT_COMPUTE_US)]
    compute_us: u64,

    /// Simulated worker pre-processing, in microseconds.
    #[arg(long, default_value_t = DEFAULT_STAGE_US)]
    pre_us: u64,

    /// Simulated worker post-processing, in microseconds.
    #[arg(long, default_value_t = DEFAULT_STAGE_US)]
    post_us: u64,

    /// Core reserved for the dispatcher thread.
    #[arg(long, default_value_t = 0)]
    dispatcher_core: usize,

    /// f32 elements per input/output buffer.
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_LEN)]
    payload_len: usize,

    /// Give up waiting for a result after this many milliseconds.
    #[arg(long)]
    await_timeout_ms: Option<u64>,

    /// Do not bind threads to cores.
    #[arg(long)]
    no_pin: bool,

    /// Fail a task with "queue full" instead of waiting for space.
    #[arg(long)]
    reject_when_full: bool,

    /// Directory for dispatch_log.csv and worker_log.csv.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

impl RunArgs {
    fn to_config(&self) -> RunConfig {
        RunConfig {
            queue_capacity: self.queue_capacity,
            workers: self.workers,
            tasks_per_worker: self.tasks_per_worker,
            compute_latency: Duration::from_micros(self.compute_us),
            pre_latency: Duration::from_micros(self.pre_us),
            post_latency: Duration::from_micros(self.post_us),
            dispatcher_core: self.dispatcher_core,
            payload_len: self.payload_len,
            await_timeout: self.await_timeout_ms.map(Duration::from_millis),
            placement: if self.no_pin {
                CorePlacement::Disabled
            } else {
                CorePlacement::Pinned
            },
            submit_mode: if self.reject_when_full {
                SubmitMode::Reject
            } else {
                SubmitMode::Block
            },
            out_dir: self.out_dir.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct SweepArgs {
    /// Comma-separated worker counts (e.g. 1,2,4).
    #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8, 12])]
    worker_sets: Vec<usize>,

    #[command(flatten)]
    run: RunArgs,
}

fn exit_code(err: &RunError) -> ExitCode {
    match err {
        RunError::Config(_) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => runner::run(&args.to_config()).map(|summary| {
            runner::print_summary(&summary);
        }),
        Command::Sweep(args) => {
            if args.worker_sets.contains(&0) {
                Err(RunError::Config(ConfigError::Zero {
                    field: "worker_sets",
                }))
            } else {
                runner::run_sweep(&args.run.to_config(), &args.worker_sets).map(|_| ())
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("accel_dispatch: {err}");
            exit_code(&err)
        }
    }
}
