//! Bounded work-queue thread pool with blocking submit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};


const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// What happens to queued-but-unstarted tasks at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Pending tasks are discarded; workers exit at their next check.
    Drop,
    /// Workers keep dequeuing until the queue is empty, then exit.
    Drain,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("thread pool is shut down")]
    Shutdown,
    #[error("worker count and queue capacity must be non-zero")]
    InvalidSize,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Draining,
    Stopping,
}

struct Task {
    id: u64,
    job: Job,
}

struct Queue {
    tasks: VecDeque<Task>,
    capacity: usize,
    state: State,
    // Task ids are a pool member, not a process global, so several pools
    // can coexist and tests stay deterministic.
    next_id: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Fixed set of worker threads multiplexed over a bounded FIFO queue.
/// `execute` blocks while the queue is full; each submitted task runs
/// exactly once unless shutdown discards it first.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ThreadPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(PoolError::InvalidSize);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::with_capacity(queue_capacity),
                capacity: queue_capacity,
                state: State::Running,
                next_id: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("handler-{i}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }

        info!(workers = worker_count, queue_capacity, "thread pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueues a job, blocking while the queue is full. Returns the task
    /// id assigned at submission, or [`PoolError::Shutdown`] once the
    /// pool no longer accepts work.
    pub fn execute<F>(&self, job: F) -> Result<u64, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        while queue.tasks.len() == queue.capacity && queue.state == State::Running {
            self.shared.not_full.wait(&mut queue);
        }
        if queue.state != State::Running {
            debug!("task submitted after shutdown, dropping");
            return Err(PoolError::Shutdown);
        }

        let id = queue.next_id;
        queue.next_id += 1;
        queue.tasks.push_back(Task {
            id,
            job: Box::new(job),
        });
        drop(queue);

        self.shared.not_empty.notify_one();
        Ok(id)
    }

    /// Stops the pool: refuses new submissions, wakes every blocked
    /// thread and joins the workers with a bounded wait. Idempotent.
    pub fn shutdown(&self, mode: ShutdownMode) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.state == State::Running {
                queue.state = match mode {
                    ShutdownMode::Drain => State::Draining,
                    ShutdownMode::Drop => State::Stopping,
                };
            }
            if queue.state == State::Stopping && !queue.tasks.is_empty() {
                warn!(dropped = queue.tasks.len(), "discarding pending tasks");
                queue.tasks.clear();
            }
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let deadline = Instant::now() + JOIN_TIMEOUT;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // Mirror of the usual detach-after-timeout: the thread is
                // abandoned rather than blocking shutdown forever.
                warn!("worker did not stop within timeout, detaching");
            }
        }
        info!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(ShutdownMode::Drop);
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.state == State::Stopping {
                    return;
                }
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.state == State::Draining {
                    return;
                }
                shared.not_empty.wait(&mut queue);
            }
        };
        shared.not_full.notify_one();

        debug!(task_id = task.id, "task started");
        (task.job)();
        debug!(task_id = task.id, "task finished");
    }
}
