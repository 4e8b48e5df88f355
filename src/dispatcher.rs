//! The single consumer standing in for the accelerator.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;
use crate::registry::PublishOutcome;
use crate::types::Task;

/// Counters reported when the dispatcher loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub processed: u64,
    pub delivered: u64,
    /// Results whose waiter had already timed out.
    pub discarded: u64,
    /// Results rejected because their slot belonged to another task.
    pub stale: u64,
}

/// Single consumer that executes queued tasks one at a time.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    compute_latency: Duration,
}

impl Dispatcher {
    /// Dispatcher over `pipeline`, spending `compute_latency` on each task.
    pub fn new(pipeline: Arc<Pipeline>, compute_latency: Duration) -> Self {
        Self {
            pipeline,
            compute_latency,
        }
    }

    /// Serve tasks in FIFO order until the queue is closed and drained.
    pub fn run(&self) -> DispatcherStats {
        let mut stats = DispatcherStats::default();
        while let Some(task) = self.pipeline.queue.dequeue() {
            self.process(task, &mut stats);
        }
        info!(
            processed = stats.processed,
            discarded = stats.discarded,
            "dispatcher drained"
        );
        stats
    }

    fn process(&self, mut task: Task, stats: &mut DispatcherStats) {
        let clock = &self.pipeline.clock;
        task.timings.compute_start_ms = clock.now_ms();
        simulate_compute(&mut task, self.compute_latency);
        task.timings.compute_end_ms = clock.now_ms();

        let task_id = task.id;
        let timings = task.timings;
        stats.processed += 1;
        match self.pipeline.complete(task) {
            Ok(PublishOutcome::Delivered) => stats.delivered += 1,
            Ok(PublishOutcome::Discarded) => {
                stats.discarded += 1;
                debug!(task_id, "waiter gone; result discarded");
            }
            Err(err) => {
                stats.stale += 1;
                warn!(task_id, error = %err, "result rejected");
            }
        }
        self.pipeline.recorder.record_dispatch(task_id, &timings);
    }
}

/// Fixed-latency stand-in for accelerator work: output is the scaled input.
fn simulate_compute(task: &mut Task, latency: Duration) {
    for (out, input) in task.output.iter_mut().zip(&task.input) {
        *out = input * 2.0;
    }
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}
