//! Producer threads: build a task, submit it, wait for exactly its result.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::affinity::{AffinityPlanner, CorePlacement};
use crate::config::SubmitMode;
use crate::error::{RunError, SubmitError, TaskError};
use crate::pipeline::Pipeline;
use crate::stats::StageSample;
use crate::types::{Task, WorkerId};

/// Per-worker knobs shared by the whole pool.
#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    pub tasks: usize,
    pub pre_latency: Duration,
    pub post_latency: Duration,
    pub payload_len: usize,
    pub await_timeout: Option<Duration>,
    pub submit_mode: SubmitMode,
}

/// Outcome of one worker's loop.
#[derive(Clone, Debug, Default)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub completed: usize,
    pub failed: usize,
    pub samples: Vec<StageSample>,
}

/// One producer: owns its id and the run's shared pipeline.
pub struct Worker {
    id: WorkerId,
    pipeline: Arc<Pipeline>,
    settings: WorkerSettings,
}

impl Worker {
    /// Build worker `id`; nothing runs until [`run`](Self::run).
    pub fn new(id: WorkerId, pipeline: Arc<Pipeline>, settings: WorkerSettings) -> Self {
        Self {
            id,
            pipeline,
            settings,
        }
    }

    /// Run the configured number of submit/await rounds.
    ///
    /// A failed task is counted and skipped; a closed queue ends the loop.
    pub fn run(&self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.id,
            ..WorkerReport::default()
        };
        for _ in 0..self.settings.tasks {
            match self.run_once() {
                Ok(sample) => {
                    report.completed += 1;
                    report.samples.push(sample);
                }
                Err(TaskError::QueueClosed) => {
                    debug!(worker = self.id, "queue closed; worker stopping");
                    break;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(worker = self.id, error = %err, "task failed");
                }
            }
        }
        report
    }

    fn run_once(&self) -> Result<StageSample, TaskError> {
        let clock = &self.pipeline.clock;
        let len = self.settings.payload_len;
        let mut task =
            Task::allocate(self.id, len).map_err(|source| TaskError::Allocation { len, source })?;

        task.timings.worker_start_ms = clock.now_ms();
        for (i, value) in task.input.iter_mut().enumerate() {
            *value = i as f32;
        }
        pause(self.settings.pre_latency);

        let submitted = match self.settings.submit_mode {
            SubmitMode::Block => self.pipeline.submit(task, self.settings.await_timeout),
            SubmitMode::Reject => self.pipeline.try_submit(task),
        };
        let task_id = match submitted {
            Ok(id) => id,
            Err(SubmitError::Closed { .. }) => return Err(TaskError::QueueClosed),
            Err(SubmitError::QueueFull { capacity, .. }) => {
                return Err(TaskError::QueueFull { capacity });
            }
            Err(SubmitError::Timeout { waited_ms, .. }) => {
                return Err(TaskError::SubmitTimeout { waited_ms });
            }
        };
        debug!(worker = self.id, task_id, "submitted");

        let mut task = self
            .pipeline
            .collect(task_id, self.settings.await_timeout)?;
        debug_assert!(
            task.completed && task.owner == self.id,
            "worker {} received task {} owned by worker {}",
            self.id,
            task.id,
            task.owner
        );
        task.timings.worker_receive_ms = clock.now_ms();
        pause(self.settings.post_latency);
        task.timings.worker_end_ms = clock.now_ms();

        self.pipeline
            .recorder
            .record_worker(self.id, task.id, &task.timings);
        Ok(StageSample::from_timings(&task.timings))
    }
}

fn pause(latency: Duration) {
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}

/// Worker threads of one run, each pinned before it does any work.
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<WorkerReport>)>,
}

impl WorkerPool {
    /// Spawn `count` named worker threads.
    ///
    /// If a spawn fails the pipeline is shut down so already-running workers
    /// stop after their current task, and the error is returned.
    pub fn spawn(
        count: usize,
        pipeline: &Arc<Pipeline>,
        settings: WorkerSettings,
        planner: &AffinityPlanner,
        placement: CorePlacement,
    ) -> Result<Self, RunError> {
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let name = format!("worker-{id}");
            let core = planner.worker_core(id);
            let worker = Worker::new(id, Arc::clone(pipeline), settings);
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                placement.apply(core);
                worker.run()
            });
            match spawned {
                Ok(handle) => handles.push((name, handle)),
                Err(source) => {
                    pipeline.shutdown();
                    // Reports of the workers that did start are not needed.
                    let _ = Self { handles }.join();
                    return Err(RunError::Spawn { name, source });
                }
            }
        }
        Ok(Self { handles })
    }

    /// Wait for every worker and collect their reports.
    pub fn join(self) -> Result<Vec<WorkerReport>, RunError> {
        let mut reports = Vec::with_capacity(self.handles.len());
        let mut panicked = None;
        for (name, handle) in self.handles {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => panicked = Some(name),
            }
        }
        match panicked {
            Some(name) => Err(RunError::Panicked { name }),
            None => Ok(reports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::recorder::TimingRecorder;
    use std::io;
    use std::sync::mpsc;

    fn test_pipeline(capacity: usize) -> Arc<Pipeline> {
        let recorder = TimingRecorder::from_writers(Box::new(io::sink()), Box::new(io::sink()))
            .expect("recorder");
        Arc::new(Pipeline::new(capacity, recorder))
    }

    fn settings(tasks: usize) -> WorkerSettings {
        WorkerSettings {
            tasks,
            pre_latency: Duration::ZERO,
            post_latency: Duration::ZERO,
            payload_len: 8,
            await_timeout: Some(Duration::from_secs(5)),
            submit_mode: SubmitMode::Block,
        }
    }

    #[test]
    fn pool_completes_every_task_with_ordered_timestamps() {
        let pipeline = test_pipeline(2);
        let dispatcher = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || Dispatcher::new(pipeline, Duration::from_micros(200)).run())
        };

        // More workers than slots exercises blocking submission.
        let planner = AffinityPlanner::new(4, 0);
        let pool = WorkerPool::spawn(5, &pipeline, settings(4), &planner, CorePlacement::Disabled)
            .expect("spawn");
        let reports = pool.join().expect("join");
        pipeline.shutdown();
        let stats = dispatcher.join().expect("dispatcher panicked");

        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|r| r.completed == 4 && r.failed == 0));
        assert_eq!(stats.delivered, 20);
        for sample in reports.iter().flat_map(|r| &r.samples) {
            assert!(sample.queue_wait_ms >= 0.0);
            assert!(sample.compute_ms >= 0.0);
            assert!(sample.delivery_ms >= 0.0);
            assert!(sample.post_ms >= 0.0);
        }
    }

    #[test]
    fn missing_dispatcher_surfaces_timeouts_instead_of_hanging() {
        let pipeline = test_pipeline(4);
        let worker = Worker::new(
            0,
            Arc::clone(&pipeline),
            WorkerSettings {
                await_timeout: Some(Duration::from_millis(5)),
                ..settings(2)
            },
        );
        let report = worker.run();
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn closed_queue_stops_worker_early() {
        let pipeline = test_pipeline(4);
        pipeline.shutdown();
        let report = Worker::new(3, Arc::clone(&pipeline), settings(5)).run();
        assert_eq!(report.worker, 3);
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn oversized_payload_fails_only_that_task() {
        let pipeline = test_pipeline(4);
        let report = Worker::new(
            0,
            Arc::clone(&pipeline),
            WorkerSettings {
                payload_len: usize::MAX,
                ..settings(2)
            },
        )
        .run();
        assert_eq!(report.failed, 2);
        // Nothing reached the queue.
        assert_eq!(pipeline.queue.len(), 0);
    }

    #[test]
    fn reject_mode_fails_task_when_queue_is_full() {
        let pipeline = test_pipeline(1);
        // Occupy the only slot with a task nobody serves.
        pipeline
            .submit(Task::allocate(9, 1).expect("alloc"), None)
            .expect("submit");
        let report = Worker::new(
            0,
            Arc::clone(&pipeline),
            WorkerSettings {
                submit_mode: SubmitMode::Reject,
                ..settings(3)
            },
        )
        .run();
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(pipeline.queue.len(), 1);
    }

    #[test]
    fn dead_dispatcher_times_out_submission_too() {
        let pipeline = test_pipeline(1);
        let (tx, rx) = mpsc::channel();
        let handle = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                let worker = Worker::new(
                    0,
                    pipeline,
                    WorkerSettings {
                        await_timeout: Some(Duration::from_millis(5)),
                        ..settings(2)
                    },
                );
                tx.send(worker.run()).expect("send report");
            })
        };

        // Task 0 still occupies the only slot, so task 1 can never be queued.
        let report = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("worker hung in submit");
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(pipeline.queue.len(), 1);
        handle.join().expect("worker panicked");
    }
}
