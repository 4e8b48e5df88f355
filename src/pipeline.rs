//! Shared state of one run, handed to the dispatcher and every worker.

use std::time::Duration;

use crate::clock::RunClock;
use crate::error::{AwaitError, RegistryError, SubmitError};
use crate::recorder::TimingRecorder;
use crate::registry::{CompletionRegistry, PublishOutcome};
use crate::task_queue::TaskQueue;
use crate::types::{Task, TaskId};

/// Queue, completion slots, timing logs and clock for a single run.
///
/// Queue and registry share one capacity so a task id maps to the same
/// index in both.
pub struct Pipeline {
    pub queue: TaskQueue,
    pub registry: CompletionRegistry,
    pub recorder: TimingRecorder,
    pub clock: RunClock,
}

impl Pipeline {
    /// Fresh pipeline of `capacity` slots; the run clock starts now.
    pub fn new(capacity: usize, recorder: TimingRecorder) -> Self {
        let clock = RunClock::start();
        Self {
            queue: TaskQueue::new(capacity, clock),
            registry: CompletionRegistry::new(capacity),
            recorder,
            clock,
        }
    }

    /// Enqueue a task, blocking until a queue and registry slot are free or
    /// `timeout` expires.
    pub fn submit(&self, task: Task, timeout: Option<Duration>) -> Result<TaskId, SubmitError> {
        self.queue.enqueue(task, &self.registry, timeout)
    }

    /// Enqueue without blocking.
    pub fn try_submit(&self, task: Task) -> Result<TaskId, SubmitError> {
        self.queue.try_enqueue(task, &self.registry)
    }

    /// Wait for a submitted task's result and release its slot.
    pub fn collect(&self, task_id: TaskId, timeout: Option<Duration>) -> Result<Task, AwaitError> {
        let task = self.registry.await_completion(task_id, timeout)?;
        self.queue.notify_space();
        Ok(task)
    }

    /// Hand a finished task to its waiter. A discarded result frees its slot
    /// here instead of in [`collect`](Self::collect).
    pub fn complete(&self, task: Task) -> Result<PublishOutcome, RegistryError> {
        let outcome = self.registry.publish(task)?;
        if outcome == PublishOutcome::Discarded {
            self.queue.notify_space();
        }
        Ok(outcome)
    }

    /// Cooperative stop: no new submissions; the dispatcher drains and exits.
    pub fn shutdown(&self) {
        self.queue.close();
    }
}
