//! # refstore-pool
//!
//! A bounded pool of worker threads consuming one shared work queue. Each
//! submitted unit of work yields a [`TaskHandle`] that resolves to the
//! task's result. Work accepted before shutdown begins runs at least once;
//! submission after shutdown fails with [`PoolError::ShutDown`].
//!
//! The intended use in refstore: the accept loop hands each connected
//! socket's session to the pool so the accepting thread never blocks
//! servicing one client.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The OS refused to spawn a worker thread during construction.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// `spawn` was called after shutdown had begun.
    #[error("spawn on a pool that is shutting down")]
    ShutDown,

    /// The task panicked while running; the worker survived.
    #[error("task panicked")]
    TaskPanicked,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    stop: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

/// Completion latch for one submitted task.
struct TaskState<T> {
    slot: Mutex<Option<Result<T, PoolError>>>,
    done: Condvar,
}

/// Handle to the eventual result of a submitted task.
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run and returns its result. A panicking
    /// task yields [`PoolError::TaskPanicked`].
    pub fn wait(self) -> Result<T, PoolError> {
        let mut slot = self.state.slot.lock();
        while slot.is_none() {
            self.state.done.wait(&mut slot);
        }
        // The slot is filled exactly once, by the worker that ran the task.
        slot.take().unwrap_or(Err(PoolError::TaskPanicked))
    }
}

/// Fixed set of workers over one shared FIFO queue.
///
/// Dropping the pool (or calling [`shutdown`](Self::shutdown)) stops intake,
/// lets the workers drain everything already queued, and joins them.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `threads` workers (at least one).
    ///
    /// Fails with [`PoolError::WorkerSpawn`] if the OS refuses a worker
    /// thread; any workers already started are stopped and joined first.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("refstore-pool-{id}"))
                .spawn(move || worker_loop(id, &worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shared.queue.lock().stop = true;
                    shared.available.notify_all();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PoolError::WorkerSpawn(source.to_string()));
                }
            }
        }

        debug!(threads, "thread pool started");
        Ok(ThreadPool { shared, workers })
    }

    /// Submits a unit of work, returning a handle to its eventual result.
    pub fn spawn<F, T>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::new(TaskState {
            slot: Mutex::new(None),
            done: Condvar::new(),
        });
        let task_state = Arc::clone(&state);

        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let result = match outcome {
                Ok(value) => Ok(value),
                Err(_) => {
                    warn!("pool task panicked");
                    Err(PoolError::TaskPanicked)
                }
            };
            *task_state.slot.lock() = Some(result);
            task_state.done.notify_all();
        });

        {
            let mut queue = self.shared.queue.lock();
            if queue.stop {
                return Err(PoolError::ShutDown);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();

        Ok(TaskHandle { state })
    }

    /// Stops intake, drains the queue, and joins every worker. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stop {
                return;
            }
            queue.stop = true;
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            // A worker only terminates by returning from its loop.
            let _ = worker.join();
        }
        debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    debug!(worker = id, "worker started");
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                // Drain the queue before honoring stop, so accepted work
                // runs even when shutdown races with submission.
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.stop {
                    debug!(worker = id, "worker exiting");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        job();
    }
}
