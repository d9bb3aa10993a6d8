use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::safe_lock::SafeLock;

/// Sampler loops each hold a worker for as long as they run, so the pool
/// never starts with fewer workers than the engine has loops.
pub const MIN_WORKERS: usize = 8;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<Job>,
    terminate: bool,
}

/// Fixed set of long-lived worker threads draining a FIFO job queue.
pub struct WorkerPool {
    queue: Arc<SafeLock<JobQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// A pool that has not started any workers yet.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(SafeLock::new(JobQueue::default())),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn default_size() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(MIN_WORKERS)
    }

    /// Spawn `workers` threads. Calling it again on a running pool is a no-op.
    pub fn start(&self, workers: usize) {
        let mut handles = self.workers.lock();
        if !handles.is_empty() {
            return;
        }
        self.queue.update(|queue| queue.terminate = false);

        let workers = workers.max(1);
        for index in 0..workers {
            let queue = Arc::clone(&self.queue);
            let spawned = thread::Builder::new()
                .name(format!("telemon-worker-{index}"))
                .spawn(move || worker_loop(&queue));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::error!(index, %err, "failed to spawn worker thread"),
            }
        }
        tracing::debug!(workers = handles.len(), "worker pool started");
    }

    pub fn start_default(&self) {
        self.start(Self::default_size());
    }

    /// Enqueue a job and wake one worker.
    pub fn queue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.lock().jobs.push_back(Box::new(job));
        self.queue.notify_one();
    }

    /// Signal termination, wake every worker and join them.
    ///
    /// Jobs still queued are dropped. Jobs already running are waited for,
    /// so long-running loops must be told to stop before the pool is.
    pub fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        self.queue.update(|queue| {
            queue.terminate = true;
            queue.jobs.clear();
        });
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }
    }

    /// Best-effort: whether the queue is empty right now.
    pub fn is_idle(&self) -> bool {
        self.queue.lock().jobs.is_empty()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(queue: &SafeLock<JobQueue>) {
    loop {
        let job = {
            let mut guard = queue.lock();
            queue.wait_while(&mut guard, |q| q.jobs.is_empty() && !q.terminate);
            if guard.terminate {
                return;
            }
            match guard.jobs.pop_front() {
                Some(job) => job,
                None => continue,
            }
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(%message, "worker job panicked");
        }
    }
}
