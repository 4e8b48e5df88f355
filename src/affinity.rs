//! Core placement: which CPU each dispatcher/worker thread is pinned to.

use tracing::{debug, warn};

use crate::types::{CoreIndex, WorkerId};

/// Maps the dispatcher and each worker to a core.
///
/// The dispatcher owns the reserved core; workers rotate over the rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffinityPlanner {
    reserved: CoreIndex,
    worker_cores: Vec<CoreIndex>,
}

impl AffinityPlanner {
    /// Plan over `available_cores` cores with `reserved` kept for the dispatcher.
    ///
    /// With a single core there is nothing to spread over, so every worker
    /// shares the reserved core.
    pub fn new(available_cores: usize, reserved: CoreIndex) -> Self {
        let worker_cores: Vec<CoreIndex> = (0..available_cores.max(1))
            .filter(|&core| core != reserved)
            .collect();
        let worker_cores = if worker_cores.is_empty() {
            vec![reserved]
        } else {
            worker_cores
        };
        Self {
            reserved,
            worker_cores,
        }
    }

    /// Core reserved for the dispatcher thread.
    pub fn dispatcher_core(&self) -> CoreIndex {
        self.reserved
    }

    /// Round-robin over the non-reserved cores.
    pub fn worker_core(&self, worker: WorkerId) -> CoreIndex {
        self.worker_cores[worker % self.worker_cores.len()]
    }
}

/// Number of cores the scheduler will let this process use.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// How (or whether) threads are bound to their planned core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorePlacement {
    /// Bind via the OS where supported; elsewhere a no-op.
    Pinned,
    Disabled,
}

impl CorePlacement {
    /// Bind the calling thread to `core`. Call once, before the thread does work.
    ///
    /// Placement is a scheduler hint: failure is logged and the thread carries on.
    pub fn apply(self, core: CoreIndex) -> bool {
        match self {
            Self::Disabled => false,
            Self::Pinned => match pin_current_thread(core) {
                Ok(()) => {
                    debug!(core, "pinned thread");
                    true
                }
                Err(err) => {
                    warn!(core, error = %err, "core pinning failed; running unpinned");
                    false
                }
            },
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread(core: CoreIndex) -> std::io::Result<()> {
    use libc::{CPU_SET, CPU_SETSIZE, CPU_ZERO, cpu_set_t, sched_setaffinity};
    use std::mem;

    if core >= CPU_SETSIZE as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("core {core} exceeds CPU_SETSIZE"),
        ));
    }
    // SAFETY: the set is zero-initialised and `core` is within CPU_SETSIZE;
    // pid 0 targets the calling thread.
    let rc = unsafe {
        let mut set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut set);
        CPU_SET(core, &mut set);
        sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_core: CoreIndex) -> std::io::Result<()> {
    Ok(())
}
