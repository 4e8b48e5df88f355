//! Bounded FIFO ring shared by every worker and the single dispatcher.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::clock::RunClock;
use crate::error::SubmitError;
use crate::registry::CompletionRegistry;
use crate::types::{Task, TaskId};

/// Fixed-capacity circular queue of pending tasks.
///
/// `tail` doubles as the next task id, so ids are strictly increasing and
/// `id % capacity` selects both the storage slot and the registry slot.
pub struct TaskQueue {
    inner: Mutex<TaskQueueState>,
    /// Stamps the request time of each task as it is stored.
    clock: RunClock,
    /// Signalled when a task is stored or the queue closes.
    available: Condvar,
    /// Signalled when storage or a registry slot frees up.
    space: Condvar,
}

struct TaskQueueState {
    slots: Vec<Option<Task>>,
    head: TaskId,
    tail: TaskId,
    closed: bool,
}

impl TaskQueueState {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        (self.tail - self.head) as usize >= self.capacity()
    }

    fn index(&self, id: TaskId) -> usize {
        (id % self.capacity() as u64) as usize
    }
}

impl TaskQueue {
    /// Create an empty queue holding at most `capacity` pending tasks.
    pub fn new(capacity: usize, clock: RunClock) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            clock,
            inner: Mutex::new(TaskQueueState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    /// Submit a task, waiting while the queue is full or the registry slot
    /// for the next id is still held by an older in-flight task.
    ///
    /// Returns the assigned task id; the registry slot is claimed for it.
    /// With a timeout, the task is handed back as `Timeout` once it expires.
    pub fn enqueue(
        &self,
        task: Task,
        registry: &CompletionRegistry,
        timeout: Option<Duration>,
    ) -> Result<TaskId, SubmitError> {
        let started = Instant::now();
        let deadline = timeout.map(|limit| started + limit);
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        loop {
            if guard.closed {
                return Err(SubmitError::Closed {
                    task: Box::new(task),
                });
            }
            if !guard.is_full() && registry.claim(guard.tail).is_ok() {
                return Ok(self.store(&mut guard, task));
            }
            // Wait releases the lock and re-acquires it before returning.
            guard = match deadline {
                None => self.space.wait(guard).expect("condvar wait failed"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SubmitError::Timeout {
                            waited_ms: started.elapsed().as_millis() as u64,
                            task: Box::new(task),
                        });
                    }
                    self.space
                        .wait_timeout(guard, deadline - now)
                        .expect("condvar wait failed")
                        .0
                }
            };
        }
    }

    /// Submit without waiting; a full queue or occupied slot is `QueueFull`.
    pub fn try_enqueue(
        &self,
        task: Task,
        registry: &CompletionRegistry,
    ) -> Result<TaskId, SubmitError> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        if guard.closed {
            return Err(SubmitError::Closed {
                task: Box::new(task),
            });
        }
        if guard.is_full() || registry.claim(guard.tail).is_err() {
            return Err(SubmitError::QueueFull {
                capacity: guard.capacity(),
                task: Box::new(task),
            });
        }
        Ok(self.store(&mut guard, task))
    }

    fn store(&self, state: &mut TaskQueueState, mut task: Task) -> TaskId {
        let id = state.tail;
        task.id = id;
        task.timings.request_ms = self.clock.now_ms();
        task.timings.worker_request_ms = task.timings.request_ms;
        let index = state.index(id);
        debug_assert!(state.slots[index].is_none(), "queue slot overwritten");
        state.slots[index] = Some(task);
        state.tail += 1;
        self.available.notify_one();
        id
    }

    /// Block until a task is available, or return `None` once the queue is
    /// closed and drained.
    pub fn dequeue(&self) -> Option<Task> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        loop {
            if guard.head != guard.tail {
                let index = guard.index(guard.head);
                let task = guard.slots[index].take();
                guard.head += 1;
                self.space.notify_all();
                debug_assert!(task.is_some(), "queue slot empty below tail");
                return task;
            }
            if guard.closed {
                return None;
            }
            guard = self.available.wait(guard).expect("condvar wait failed");
        }
    }

    /// Wake submitters after a registry slot has been vacated.
    pub fn notify_space(&self) {
        // Taking the lock orders this wakeup after any in-progress capacity check.
        let _guard = self.inner.lock().expect("task queue mutex poisoned");
        self.space.notify_all();
    }

    /// Stop accepting tasks and wake every blocked producer and consumer.
    /// Tasks already queued are still handed out by [`dequeue`](Self::dequeue).
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.closed = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Current number of queued tasks.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        (guard.tail - guard.head) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    fn new_queue(capacity: usize) -> TaskQueue {
        TaskQueue::new(capacity, RunClock::start())
    }

    fn task(owner: usize) -> Task {
        Task::allocate(owner, 4).expect("allocation failed")
    }

    #[test]
    fn ids_follow_enqueue_order_and_dequeue_is_fifo() {
        let queue = new_queue(8);
        let registry = CompletionRegistry::new(8);
        for owner in 0..5 {
            let id = queue.enqueue(task(owner), &registry, None).expect("enqueue");
            assert_eq!(id, owner as u64);
        }
        for expected in 0..5u64 {
            let task = queue.dequeue().expect("task");
            assert_eq!(task.id, expected);
            assert_eq!(task.owner, expected as usize);
        }
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn try_enqueue_reports_full_instead_of_overwriting() {
        let queue = new_queue(2);
        let registry = CompletionRegistry::new(2);
        queue.try_enqueue(task(0), &registry).expect("first");
        queue.try_enqueue(task(1), &registry).expect("second");
        let err = queue.try_enqueue(task(2), &registry).expect_err("full");
        match err {
            SubmitError::QueueFull { capacity, task } => {
                assert_eq!(capacity, 2);
                // The rejected task comes back untouched.
                assert_eq!(task.owner, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(queue.dequeue().expect("task").id, 0);
    }

    #[test]
    fn try_enqueue_full_while_slot_uncollected() {
        let queue = new_queue(1);
        let registry = CompletionRegistry::new(1);
        queue.try_enqueue(task(0), &registry).expect("first");
        let first = queue.dequeue().expect("task");
        // Storage is free again but the registry slot is not.
        assert!(queue.try_enqueue(task(1), &registry).is_err());
        registry.publish(first).expect("publish");
        registry.await_completion(0, None).expect("await");
        assert_eq!(queue.try_enqueue(task(1), &registry).expect("second"), 1);
    }

    #[test]
    fn enqueue_blocks_until_slot_collected() {
        let queue = Arc::new(new_queue(1));
        let registry = Arc::new(CompletionRegistry::new(1));
        queue.enqueue(task(0), &registry, None).expect("first");
        let first = queue.dequeue().expect("task");
        registry.publish(first).expect("publish");

        let (done_tx, done_rx) = mpsc::channel();
        let submitter = {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let id = queue.enqueue(task(1), &registry, None).expect("second");
                done_tx.send(id).expect("done");
            })
        };

        // Slot 0 still holds task 0's uncollected result.
        assert!(done_rx.recv_timeout(Duration::from_millis(30)).is_err());
        registry.await_completion(0, None).expect("await");
        queue.notify_space();

        let id = done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("submitter woke");
        assert_eq!(id, 1);
        submitter.join().expect("submitter panicked");
    }

    #[test]
    fn enqueue_gives_up_at_deadline_and_returns_task() {
        let queue = new_queue(1);
        let registry = CompletionRegistry::new(1);
        queue
            .enqueue(task(0), &registry, Some(Duration::from_millis(5)))
            .expect("first");
        // Nobody dequeues, so the only slot never frees up.
        let err = queue
            .enqueue(task(7), &registry, Some(Duration::from_millis(5)))
            .expect_err("should time out");
        match err {
            SubmitError::Timeout { task, .. } => assert_eq!(task.owner, 7),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(new_queue(4));
        let registry = CompletionRegistry::new(4);
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let queue_clone = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("send ready");
            let task = queue_clone.dequeue().expect("task queue closed");
            tx.send(task.owner).expect("send owner");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        // Enqueueing after the consumer blocks should wake it.
        queue.enqueue(task(9), &registry, None).expect("enqueue");

        let received = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("receive owner");
        assert_eq!(received, 9);
        handle.join().expect("blocking dequeue thread panicked");
    }

    #[test]
    fn concurrent_producers_get_unique_contiguous_ids() {
        let capacity = 64;
        let queue = Arc::new(new_queue(capacity));
        let registry = Arc::new(CompletionRegistry::new(capacity));
        let producers = 4;
        let per_producer = 16;
        let barrier = Arc::new(Barrier::new(producers));
        let seen: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for owner in 0..producers {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_producer {
                    let id = queue.enqueue(task(owner), &registry, None).expect("enqueue");
                    let mut guard = seen.lock().expect("seen mutex poisoned");
                    // Each id should be handed out at most once.
                    assert!(guard.insert(id));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("producer thread panicked");
        }

        let total = (producers * per_producer) as u64;
        let guard = seen.lock().expect("seen mutex poisoned");
        assert_eq!(guard.len() as u64, total);
        assert!((0..total).all(|id| guard.contains(&id)));
        for expected in 0..total {
            assert_eq!(queue.dequeue().expect("task").id, expected);
        }
    }

    #[test]
    fn dequeue_drains_then_returns_none_after_close() {
        let queue = new_queue(4);
        let registry = CompletionRegistry::new(4);
        queue.enqueue(task(0), &registry, None).expect("enqueue");
        queue.close();
        assert_eq!(queue.dequeue().expect("drained task").id, 0);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn close_unblocks_waiting_consumer() {
        let queue = Arc::new(new_queue(2));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let queue_clone = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            let task = queue_clone.dequeue();
            done_tx.send(task.is_none()).expect("done");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        queue.close();

        let closed = done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("done recv");
        assert!(closed);
        handle.join().expect("consumer thread panicked");
    }

    #[test]
    fn enqueue_fails_after_close() {
        let queue = new_queue(2);
        let registry = CompletionRegistry::new(2);
        queue.close();
        let result = queue.enqueue(task(1), &registry, None);
        assert!(matches!(result, Err(SubmitError::Closed { .. })));
        // A refused task never claims a registry slot.
        assert!(registry.is_vacant(0));
    }
}
