//! Per-task completion slots: point-to-point "task done" signaling from the
//! dispatcher to the one worker waiting on that task.
//!
//! Slots are indexed by `task_id % capacity` and remember which task they
//! currently belong to, so a signal meant for one task can never wake the
//! waiter of another task that later reuses the slot.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AwaitError, RegistryError};
use crate::types::{Task, TaskId};

#[derive(Debug)]
enum SlotState {
    Vacant,
    /// Claimed at enqueue; the owner has not received a result yet.
    Pending(TaskId),
    Done(Box<Task>),
    /// The waiter gave up; the eventual result is dropped on publish.
    Abandoned(TaskId),
}

impl SlotState {
    fn holder(&self) -> Option<TaskId> {
        match self {
            Self::Vacant => None,
            Self::Pending(id) | Self::Abandoned(id) => Some(*id),
            Self::Done(task) => Some(task.id),
        }
    }
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// What happened to a published result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored in the slot and the waiter was woken.
    Delivered,
    /// Waiter had timed out; the slot is vacant again.
    Discarded,
}

/// Fixed pool of completion slots, each with its own lock and condition.
pub struct CompletionRegistry {
    slots: Vec<Slot>,
}

impl CompletionRegistry {
    /// Create a registry with `capacity` vacant slots.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "registry capacity must be > 0");
        let slots = (0..capacity)
            .map(|_| Slot {
                state: Mutex::new(SlotState::Vacant),
                ready: Condvar::new(),
            })
            .collect();
        Self { slots }
    }

    fn slot_index(&self, task_id: TaskId) -> usize {
        (task_id % self.slots.len() as u64) as usize
    }

    /// Whether the slot `task_id` maps to is free for a new task.
    #[cfg(test)]
    pub fn is_vacant(&self, task_id: TaskId) -> bool {
        let slot = &self.slots[self.slot_index(task_id)];
        let guard = slot.state.lock().expect("registry slot mutex poisoned");
        matches!(*guard, SlotState::Vacant)
    }

    /// Reserve the slot for `task_id`. Fails if an older task still holds it.
    pub fn claim(&self, task_id: TaskId) -> Result<(), RegistryError> {
        let index = self.slot_index(task_id);
        let mut guard = self.slots[index]
            .state
            .lock()
            .expect("registry slot mutex poisoned");
        match guard.holder() {
            None => {
                *guard = SlotState::Pending(task_id);
                Ok(())
            }
            Some(holder) => Err(RegistryError::SlotUnavailable {
                slot: index,
                task_id,
                holder,
            }),
        }
    }

    /// Store a finished task and wake its owner.
    ///
    /// Only the dispatcher calls this. A task whose slot no longer belongs to
    /// it is rejected and the slot is left untouched.
    pub fn publish(&self, mut task: Task) -> Result<PublishOutcome, RegistryError> {
        let index = self.slot_index(task.id);
        let slot = &self.slots[index];
        let mut guard = slot.state.lock().expect("registry slot mutex poisoned");
        match *guard {
            SlotState::Pending(id) if id == task.id => {
                task.completed = true;
                *guard = SlotState::Done(Box::new(task));
                slot.ready.notify_all();
                Ok(PublishOutcome::Delivered)
            }
            SlotState::Abandoned(id) if id == task.id => {
                *guard = SlotState::Vacant;
                Ok(PublishOutcome::Discarded)
            }
            _ => Err(RegistryError::StaleSignal {
                slot: index,
                task_id: task.id,
            }),
        }
    }

    /// Block until `task_id` has been published, then take it and free the slot.
    ///
    /// With a timeout, expiry abandons the slot and reports a dispatch timeout;
    /// the late result is discarded by [`publish`](Self::publish).
    pub fn await_completion(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<Task, AwaitError> {
        let slot = &self.slots[self.slot_index(task_id)];
        let started = Instant::now();
        let deadline = timeout.map(|limit| started + limit);
        let mut guard = slot.state.lock().expect("registry slot mutex poisoned");
        loop {
            match std::mem::replace(&mut *guard, SlotState::Vacant) {
                SlotState::Done(task) if task.id == task_id => return Ok(*task),
                SlotState::Pending(id) if id == task_id => *guard = SlotState::Pending(id),
                other => {
                    let holder = other.holder();
                    *guard = other;
                    return Err(AwaitError::StaleSlot { task_id, holder });
                }
            }

            guard = match deadline {
                None => slot.ready.wait(guard).expect("condvar wait failed"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        *guard = SlotState::Abandoned(task_id);
                        return Err(AwaitError::DispatchTimeout {
                            task_id,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    // Spurious wakeups and early returns loop back to the state check.
                    slot.ready
                        .wait_timeout(guard, deadline - now)
                        .expect("condvar wait failed")
                        .0
                }
            };
        }
    }
}
