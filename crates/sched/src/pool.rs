use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::SchedError;

/// Worker count for CPU-bound builds: half the cores, at least one.
pub fn default_worker_count() -> usize {
    (num_cpus::get() / 2).max(1)
}

type WorkFn<J, R> = Arc<dyn Fn(J) -> R + Send + Sync>;

/// Fixed-size pool running one function over submitted jobs.
///
/// With zero threads, jobs run inline inside [`submit`](Self::submit); their
/// results still only come out of [`try_drain`](Self::try_drain).
pub struct WorkerPool<J, R> {
    name: String,
    job_tx: Option<Sender<J>>,
    result_tx: Sender<R>,
    result_rx: Receiver<R>,
    work: WorkFn<J, R>,
    handles: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    pub fn new(
        name: &str,
        threads: usize,
        work: impl Fn(J) -> R + Send + Sync + 'static,
    ) -> Result<Self, SchedError> {
        let work: WorkFn<J, R> = Arc::new(work);
        let (job_tx, job_rx) = unbounded::<J>();
        let (result_tx, result_rx) = unbounded::<R>();

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let work = Arc::clone(&work);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(job) = jobs.recv() {
                        if results.send(work(job)).is_err() {
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }
        tracing::debug!(pool = name, threads, "worker pool started");

        Ok(Self {
            name: name.to_string(),
            job_tx: Some(job_tx),
            result_tx,
            result_rx,
            work,
            handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    pub fn submit(&self, job: J) -> Result<(), SchedError> {
        if self.handles.is_empty() {
            return self
                .result_tx
                .send((self.work)(job))
                .map_err(|_| SchedError::PoolClosed);
        }
        let tx = self.job_tx.as_ref().ok_or(SchedError::PoolClosed)?;
        tx.send(job).map_err(|_| SchedError::PoolClosed)
    }

    /// Every result available right now.
    pub fn try_drain(&self) -> Vec<R> {
        let mut results = Vec::new();
        while let Ok(r) = self.result_rx.try_recv() {
            results.push(r);
        }
        results
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        // Closing the job channel ends every worker loop.
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn inline_pool_defers_results_to_drain() {
        let pool = WorkerPool::new("inline", 0, |x: u32| x * 2).unwrap();
        assert_eq!(pool.threads(), 0);
        pool.submit(1).unwrap();
        pool.submit(2).unwrap();
        assert_eq!(pool.try_drain(), [2, 4]);
        assert!(pool.try_drain().is_empty());
    }

    #[test]
    fn threaded_pool_runs_every_job() {
        let pool = WorkerPool::new("test-worker", 3, |x: u64| x + 1).unwrap();
        for i in 0..50 {
            pool.submit(i).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < 50 {
            assert!(Instant::now() < deadline, "timed out after {} results", results.len());
            results.extend(pool.try_drain());
            std::thread::sleep(Duration::from_millis(1));
        }
        results.sort();
        assert_eq!(results, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn drop_joins_workers() {
        let pool = WorkerPool::new("drop-test", 2, |x: u8| x).unwrap();
        pool.submit(1).unwrap();
        drop(pool);
    }

    #[test]
    fn default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
    }
}
