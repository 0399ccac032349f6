//! Bounded worker pool.
//!
//! One pool per run, injected into the components that fan work out, so the
//! concurrency limit lives in exactly one place. Thin wrapper over a
//! dedicated `rayon::ThreadPool` with explicit task submission and joinable
//! handles; blocking wallet/RPC calls run inside the pool's threads.

use std::sync::mpsc;

/// Errors from pool construction or task collection
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to build thread pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),

    #[error("Worker task panicked before producing a result")]
    Lost,
}

/// Handle to a submitted task's eventual result
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes
    pub fn join(self) -> Result<T, PoolError> {
        self.rx.recv().map_err(|_| PoolError::Lost)
    }
}

/// Bounded pool of OS worker threads
pub struct WorkerPool {
    inner: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Build a pool with exactly `threads` workers (0 = one per CPU)
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shardload-worker-{}", i))
            .build()?;
        let threads = inner.current_num_threads();
        Ok(Self { inner, threads })
    }

    /// Number of worker slots
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Submit a task; the returned handle blocks on `join` until the task
    /// completes. Tasks may outlive the caller's stack frame.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.inner.spawn(move || {
            // Receiver may have been dropped if the caller gave up; nothing
            // to do with the result in that case.
            let _ = tx.send(task());
        });
        TaskHandle { rx }
    }

    /// Run a batch of tasks and collect their results in submission order,
    /// blocking until all complete.
    pub fn run_all<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T, PoolError>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let handles: Vec<TaskHandle<T>> = tasks.into_iter().map(|t| self.submit(t)).collect();
        handles.into_iter().map(TaskHandle::join).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_submit_and_join() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.submit(|| 21 * 2);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_run_all_preserves_order() {
        let pool = WorkerPool::new(4).unwrap();
        let tasks: Vec<_> = (0..16).map(|i| move || i * i).collect();
        let results: Vec<i32> = pool
            .run_all(tasks)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results[3], 9);
        assert_eq!(results[15], 225);
    }

    #[test]
    fn test_thread_cap_is_respected() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                move || {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    live.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        for result in pool.run_all(tasks) {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
