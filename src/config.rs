//! Startup parameters for a dispatch run.

use std::path::PathBuf;
use std::time::Duration;

use crate::affinity::CorePlacement;
use crate::error::ConfigError;
use crate::types::CoreIndex;

pub const DEFAULT_QUEUE_CAPACITY: usize = 128;
pub const DEFAULT_WORKERS: usize = 12;
pub const DEFAULT_TASKS_PER_WORKER: usize = 1;
pub const DEFAULT_COMPUTE_US: u64 = 1000;
pub const DEFAULT_STAGE_US: u64 = 500;
pub const DEFAULT_PAYLOAD_LEN: usize = 1024;

/// What a worker does when the queue has no room for its task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Wait until the queue and the task's completion slot are free.
    Block,
    /// Fail the task with a queue-full error.
    Reject,
}

/// Everything a run needs, fixed before any thread starts.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub tasks_per_worker: usize,
    /// Simulated accelerator latency per task.
    pub compute_latency: Duration,
    pub pre_latency: Duration,
    pub post_latency: Duration,
    pub dispatcher_core: CoreIndex,
    /// f32 elements in each of a task's input and output buffers.
    pub payload_len: usize,
    /// `None` waits forever for the dispatcher.
    pub await_timeout: Option<Duration>,
    pub placement: CorePlacement,
    pub submit_mode: SubmitMode,
    /// Directory receiving both timing logs.
    pub out_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            tasks_per_worker: DEFAULT_TASKS_PER_WORKER,
            compute_latency: Duration::from_micros(DEFAULT_COMPUTE_US),
            pre_latency: Duration::from_micros(DEFAULT_STAGE_US),
            post_latency: Duration::from_micros(DEFAULT_STAGE_US),
            dispatcher_core: 0,
            payload_len: DEFAULT_PAYLOAD_LEN,
            await_timeout: None,
            placement: CorePlacement::Pinned,
            submit_mode: SubmitMode::Block,
            out_dir: PathBuf::from("."),
        }
    }
}

impl RunConfig {
    /// Reject configurations that cannot run; `available_cores` bounds the
    /// dispatcher core when pinning is enabled.
    pub fn validate(&self, available_cores: usize) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "queue_capacity",
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.tasks_per_worker == 0 {
            return Err(ConfigError::Zero {
                field: "tasks_per_worker",
            });
        }
        if self.payload_len == 0 {
            return Err(ConfigError::Zero {
                field: "payload_len",
            });
        }
        if self.await_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::Zero {
                field: "await_timeout_ms",
            });
        }
        if self.placement == CorePlacement::Pinned && self.dispatcher_core >= available_cores {
            return Err(ConfigError::DispatcherCore {
                core: self.dispatcher_core,
                available: available_cores,
            });
        }
        Ok(())
    }

    /// Total tasks the run will submit.
    pub fn total_tasks(&self) -> usize {
        self.workers * self.tasks_per_worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        assert_eq!(config.validate(1), Ok(()));
        assert_eq!(config.total_tasks(), 12);
    }

    #[test]
    fn zero_fields_are_rejected() {
        let config = RunConfig {
            queue_capacity: 0,
            ..RunConfig::default()
        };
        assert_eq!(
            config.validate(4),
            Err(ConfigError::Zero {
                field: "queue_capacity"
            })
        );
        let config = RunConfig {
            tasks_per_worker: 0,
            ..RunConfig::default()
        };
        assert!(config.validate(4).is_err());
    }

    #[test]
    fn dispatcher_core_checked_only_when_pinning() {
        let config = RunConfig {
            dispatcher_core: 8,
            ..RunConfig::default()
        };
        assert_eq!(
            config.validate(4),
            Err(ConfigError::DispatcherCore {
                core: 8,
                available: 4
            })
        );
        let unpinned = RunConfig {
            placement: CorePlacement::Disabled,
            ..config
        };
        assert_eq!(unpinned.validate(4), Ok(()));
    }

    #[test]
    fn zero_await_timeout_is_rejected() {
        let config = RunConfig {
            await_timeout: Some(Duration::ZERO),
            ..RunConfig::default()
        };
        assert_eq!(
            config.validate(4),
            Err(ConfigError::Zero {
                field: "await_timeout_ms"
            })
        );
        let config = RunConfig {
            await_timeout: Some(Duration::from_millis(1)),
            ..RunConfig::default()
        };
        assert_eq!(config.validate(4), Ok(()));
    }
}
