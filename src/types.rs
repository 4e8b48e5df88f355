//! Shared identifiers and task model used across the system.

use std::collections::TryReserveError;

/// Sequence number assigned to a task at enqueue time.
pub type TaskId = u64;
/// Identifier for a producer (worker) thread.
pub type WorkerId = usize;
/// Index of a logical CPU core.
pub type CoreIndex = usize;

/// Timestamps collected while a task moves through the pipeline.
///
/// All values are milliseconds since the run's [`RunClock`](crate::clock::RunClock) epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskTimings {
    pub request_ms: f64,
    pub compute_start_ms: f64,
    pub compute_end_ms: f64,
    pub worker_start_ms: f64,
    pub worker_request_ms: f64,
    pub worker_receive_ms: f64,
    pub worker_end_ms: f64,
}

/// Unit of work submitted by a worker and executed by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    /// Assigned by the queue on enqueue; zero until then.
    pub id: TaskId,
    /// Worker that built the task and waits for its result.
    pub owner: WorkerId,
    pub input: Vec<f32>,
    pub output: Vec<f32>,
    /// Set exactly once by the dispatcher.
    pub completed: bool,
    pub timings: TaskTimings,
}

impl Task {
    /// Allocate a task with zeroed input/output buffers of `payload_len` elements.
    pub fn allocate(owner: WorkerId, payload_len: usize) -> Result<Self, TryReserveError> {
        let mut input = Vec::new();
        input.try_reserve_exact(payload_len)?;
        input.resize(payload_len, 0.0);
        let mut output = Vec::new();
        output.try_reserve_exact(payload_len)?;
        output.resize(payload_len, 0.0);
        Ok(Self {
            id: 0,
            owner,
            input,
            output,
            completed: false,
            timings: TaskTimings::default(),
        })
    }
}
