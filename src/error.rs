//! Error types for submission, completion, configuration and run startup.

use std::collections::TryReserveError;
use std::io;

use crate::types::{Task, TaskId};

/// Reasons a task could not be placed on the queue.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Queue (or the registry slot for the next id) is occupied.
    #[error("queue full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
        /// The rejected task, handed back to the caller.
        task: Box<Task>,
    },

    /// Queue has been closed for shutdown.
    #[error("queue closed")]
    Closed { task: Box<Task> },

    /// No queue or registry slot freed up before the deadline.
    #[error("submission timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64, task: Box<Task> },
}

/// Registry slot conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Slot is still held by an older in-flight task.
    #[error("slot {slot} unavailable for task {task_id}: held by task {holder}")]
    SlotUnavailable {
        slot: usize,
        task_id: TaskId,
        holder: TaskId,
    },

    /// Signal for a task that no longer owns its slot.
    #[error("stale signal for task {task_id} on slot {slot}")]
    StaleSignal { slot: usize, task_id: TaskId },
}

/// Reasons a worker did not receive its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AwaitError {
    #[error("dispatch timeout for task {task_id} after {waited_ms}ms")]
    DispatchTimeout { task_id: TaskId, waited_ms: u64 },

    /// Slot belongs to a different task than the one awaited.
    #[error("slot for task {task_id} is owned by {holder:?}")]
    StaleSlot {
        task_id: TaskId,
        holder: Option<TaskId>,
    },
}

/// Failure of a single task, local to its worker.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("payload allocation of {len} elements failed: {source}")]
    Allocation {
        len: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("queue closed before submission")]
    QueueClosed,

    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("submission timed out after {waited_ms}ms")]
    SubmitTimeout { waited_ms: u64 },

    #[error(transparent)]
    Await(#[from] AwaitError),
}

/// Invalid startup parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    Zero { field: &'static str },

    #[error("dispatcher core {core} out of range ({available} cores available)")]
    DispatcherCore { core: usize, available: usize },
}

/// Fatal failures that abort a run before or during startup.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open timing log {path}: {source}")]
    LogOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("thread {name} panicked")]
    Panicked { name: String },
}
