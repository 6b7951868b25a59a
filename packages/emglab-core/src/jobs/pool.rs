// Worker pool - bounded rayon pool for training, predict and save jobs
//
// Features:
// - Results bridged back to async callers through oneshot channels
// - Panics inside a job are caught and reported as `JobPanicked`
// - Job registry with auto-cleanup of old finished entries
// - Idempotent shutdown
// - Bounded wait for every in-flight job

use super::types::{JobHandle, JobInfo, JobKind, JobState};
use crate::error::{EmgError, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

const MAX_FINISHED_JOBS: usize = 100;

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobInfo>>,
    finished: Notify,
}

impl JobRegistry {
    fn register(&self, name: impl Into<String>, kind: JobKind) -> Uuid {
        let info = JobInfo::new(name, kind);
        let id = info.id;
        self.jobs.write().insert(id, info);
        log::trace!("Job registered: {} ({})", id, kind);
        id
    }

    fn mark_started(&self, id: Uuid) {
        if let Some(job) = self.jobs.write().get_mut(&id) {
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
        }
    }

    fn mark_finished(&self, id: Uuid, error: Option<String>) {
        if let Some(job) = self.jobs.write().get_mut(&id) {
            job.completed_at = Some(Utc::now());
            match error {
                None => job.state = JobState::Completed,
                Some(e) => {
                    log::warn!("Job {} '{}' failed: {}", id, job.name, e);
                    job.state = JobState::Failed;
                    job.error = Some(e);
                }
            }
        }
        self.cleanup_finished();
        self.finished.notify_waiters();
    }

    fn cleanup_finished(&self) {
        let mut jobs = self.jobs.write();
        let mut finished: Vec<_> = jobs
            .values()
            .filter(|info| info.is_terminal())
            .filter_map(|info| info.completed_at.map(|t| (info.id, t)))
            .collect();

        if finished.len() <= MAX_FINISHED_JOBS {
            return;
        }

        // oldest first
        finished.sort_by(|(_, a), (_, b)| a.cmp(b));
        let to_remove = finished.len() - MAX_FINISHED_JOBS;
        for (id, _) in finished.into_iter().take(to_remove) {
            jobs.remove(&id);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn active_count(&self, kind: JobKind) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|info| info.kind == kind && info.is_active())
            .count()
    }

    /// Queued or running jobs of any kind
    pub fn active_total(&self) -> usize {
        self.jobs.read().values().filter(|info| info.is_active()).count()
    }

    pub fn total_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Resolve once no job is queued or running, or fail with `JobTimeout`
    pub async fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let finished = self.finished.notified();
            tokio::pin!(finished);
            // register before checking so a completion in between is not missed
            finished.as_mut().enable();

            if self.active_total() == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, finished).await.is_err() {
                return Err(EmgError::JobTimeout(timeout.as_millis() as u64));
            }
        }
    }
}

pub struct WorkerPool {
    pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
    registry: Arc<JobRegistry>,
    num_threads: usize,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("emglab-worker-{}", i))
            .build()
            .map_err(|e| {
                EmgError::InvalidConfig(format!("Failed to create worker pool: {}", e))
            })?;

        log::info!("Worker pool started with {} threads", num_threads);

        Ok(Self {
            pool: Mutex::new(Some(Arc::new(pool))),
            registry: Arc::new(JobRegistry::default()),
            num_threads,
        })
    }

    /// One thread per available core
    pub fn with_default_threads() -> Result<Self> {
        Self::new(num_cpus::get())
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Wait for every submitted job, whatever its kind, to finish
    pub async fn wait_idle(&self, timeout: Duration) -> Result<()> {
        self.registry.wait_idle(timeout).await
    }

    /// Queue `f` on the pool
    ///
    /// Fails with `PoolShutDown` once the pool has been released.
    pub fn submit<T, F>(&self, kind: JobKind, name: impl Into<String>, f: F) -> Result<JobHandle<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.lock().clone().ok_or(EmgError::PoolShutDown)?;

        let id = self.registry.register(name, kind);
        let (tx, rx) = oneshot::channel();
        let registry = Arc::clone(&self.registry);

        pool.spawn(move || {
            registry.mark_started(id);

            let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => result,
                Err(payload) => Err(EmgError::JobPanicked(panic_message(payload.as_ref()))),
            };

            registry.mark_finished(id, result.as_ref().err().map(|e| e.to_string()));

            // receiver may be gone; the result is then discarded
            let _ = tx.send(result);
        });

        Ok(JobHandle::new(id, kind, rx))
    }

    /// Release the pool; returns true only for the call that released it
    ///
    /// Jobs already queued still run to completion.
    pub fn shutdown(&self) -> bool {
        match self.pool.lock().take() {
            Some(_) => {
                log::info!("Worker pool shut down");
                true
            }
            None => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_submit_and_wait() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool
            .submit(JobKind::Predict, "answer", || Ok(6 * 7))
            .unwrap();
        let id = handle.id;

        assert_eq!(handle.wait().await.unwrap(), 42);
        assert_eq!(pool.registry().get(id).unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_job_error_is_returned() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .submit(JobKind::Training, "fails", || -> Result<()> {
                Err(EmgError::Training("no data".to_string()))
            })
            .unwrap();
        let id = handle.id;

        assert!(matches!(handle.wait().await, Err(EmgError::Training(_))));
        let info = pool.registry().get(id).unwrap();
        assert_eq!(info.state, JobState::Failed);
        assert!(info.error.unwrap().contains("no data"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .submit(JobKind::Training, "panics", || -> Result<()> {
                panic!("boom");
            })
            .unwrap();

        match handle.wait().await {
            Err(EmgError::JobPanicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }

        // the worker thread survives
        let handle = pool.submit(JobKind::Predict, "after", || Ok(1)).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .submit(JobKind::SaveRecording, "slow", || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();

        let result = handle.wait_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EmgError::JobTimeout(20))));
    }

    #[test]
    fn test_blocking_wait() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .submit(JobKind::Predict, "blocking", || Ok("done".to_string()))
            .unwrap();
        assert_eq!(handle.blocking_wait().unwrap(), "done");
    }

    #[test]
    fn test_shutdown_once() {
        let pool = WorkerPool::new(1).unwrap();
        assert!(pool.is_running());
        assert!(pool.shutdown());
        assert!(!pool.shutdown());
        assert!(!pool.is_running());

        let result = pool.submit(JobKind::Predict, "late", || Ok(()));
        assert!(matches!(result, Err(EmgError::PoolShutDown)));
    }

    #[test]
    fn test_queued_jobs_finish_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(JobKind::SaveRecording, "count", move || {
                    std::thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        pool.shutdown();
        for handle in handles {
            handle.blocking_wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_wait_idle_covers_every_kind() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for kind in [JobKind::SaveRecording, JobKind::Training, JobKind::Predict] {
            let counter = Arc::clone(&counter);
            // handles dropped on purpose
            pool.submit(kind, "background", move || {
                std::thread::sleep(Duration::from_millis(30));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        pool.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(pool.registry().active_total(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(JobKind::SaveRecording, "slow", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .unwrap();

        let result = pool.wait_idle(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EmgError::JobTimeout(20))));
        assert_eq!(pool.registry().active_count(JobKind::SaveRecording), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_pool() {
        let pool = WorkerPool::new(1).unwrap();
        pool.wait_idle(Duration::ZERO).await.unwrap();
    }

    #[test]
    fn test_registry_cleanup_bounds_history() {
        let pool = WorkerPool::new(2).unwrap();
        let handles: Vec<_> = (0..MAX_FINISHED_JOBS + 20)
            .map(|i| pool.submit(JobKind::Predict, "tick", move || Ok(i)).unwrap())
            .collect();
        for handle in handles {
            handle.blocking_wait().unwrap();
        }

        assert!(pool.registry().total_count() <= MAX_FINISHED_JOBS + 1);
        assert_eq!(pool.registry().active_count(JobKind::Predict), 0);
    }
}
