// Session - owns every core component for one acquisition session
//
// Lifecycle: `Session::init` builds the components from a `SessionConfig`,
// `teardown` stops the inference loop, waits (bounded) for every outstanding
// job of any kind and releases the worker pool exactly once. Dropping a
// session without teardown cancels the loop and releases the pool without
// waiting.

use crate::buffer::{ChannelBufferPool, ChannelHandle, PredictionSnapshot};
use crate::config::SessionConfig;
use crate::error::{EmgError, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::inference::{InferenceLoop, InferenceStats};
use crate::jobs::{JobHandle, JobKind, WorkerPool};
use crate::model::{LoadedModel, ModelStore};
use crate::training::{TrainingJobManager, TrainingOptions, TrainingReport, TrainingState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use uuid::Uuid;

pub struct Session {
    config: SessionConfig,
    buffers: Arc<ChannelBufferPool>,
    models: Arc<ModelStore>,
    workers: Arc<WorkerPool>,
    events: Arc<EventBus>,
    training: TrainingJobManager,
    inference: InferenceLoop,
    /// Runtime current at `init`, used when inference is started from a plain thread
    runtime: Option<Handle>,
}

impl Session {
    pub fn init(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let buffers = Arc::new(ChannelBufferPool::from_config(&config));
        let models = Arc::new(ModelStore::new());
        let workers = Arc::new(WorkerPool::new(config.worker_count())?);
        let events = Arc::new(EventBus::new());

        let training = TrainingJobManager::new(
            Arc::clone(&workers),
            Arc::clone(&events),
            Arc::clone(&models),
            config.num_channels,
        );
        let inference = InferenceLoop::new(
            Arc::clone(&buffers),
            Arc::clone(&models),
            Arc::clone(&workers),
            Arc::clone(&events),
            config.inference_period(),
        );

        log::info!(
            "Session initialized: {} channels, display {} / prediction {} samples",
            config.num_channels,
            config.display_capacity,
            config.prediction_capacity
        );

        Ok(Self {
            config,
            buffers,
            models,
            workers,
            events,
            training,
            inference,
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn buffers(&self) -> &Arc<ChannelBufferPool> {
        &self.buffers
    }

    pub fn models(&self) -> &Arc<ModelStore> {
        &self.models
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Register a presentation-layer handler
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler);
    }

    pub fn append(&self, channel: usize, value: f64) -> Result<()> {
        self.buffers.append(channel, value)
    }

    pub fn handles(&self) -> Vec<ChannelHandle> {
        self.buffers.handles()
    }

    pub fn prediction_snapshot(&self) -> PredictionSnapshot {
        self.buffers.prediction_snapshot()
    }

    pub fn set_recording(&self, active: bool) {
        self.buffers.set_recording(active);
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.buffers.set_label(label);
    }

    pub fn clear(&self) {
        self.buffers.clear();
    }

    pub fn export_recording_csv(&self) -> Result<String> {
        self.buffers.export_recording_csv()
    }

    /// Write the recording export to `path` on the worker pool
    ///
    /// Resolves to the number of data rows written.
    pub fn save_recording(&self, path: impl Into<PathBuf>) -> Result<JobHandle<usize>> {
        let path = path.into();
        let buffers = Arc::clone(&self.buffers);
        let events = Arc::clone(&self.events);
        let name = format!("save {}", path.display());

        self.workers.submit(JobKind::SaveRecording, name, move || {
            let result = buffers.export_recording().and_then(|table| {
                table.write_csv(&path)?;
                Ok(table.num_rows())
            });

            match &result {
                Ok(rows) => {
                    log::info!("Saved {} rows to {}", rows, path.display());
                    events.emit(Event::RecordingSaved {
                        ok: true,
                        path: path.clone(),
                        rows: *rows,
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!("Saving recording to {} failed: {}", path.display(), e);
                    events.emit(Event::RecordingSaved {
                        ok: false,
                        path: path.clone(),
                        rows: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
            result
        })
    }

    pub fn start_training(&self, options: TrainingOptions) -> Result<Uuid> {
        self.training.start_training(options)
    }

    pub fn training_state(&self) -> TrainingState {
        self.training.state()
    }

    pub async fn join_training(&self, timeout: Duration) -> Result<Option<TrainingReport>> {
        self.training.join(timeout).await
    }

    pub fn load_model(&self, path: impl AsRef<Path>) -> Result<Uuid> {
        self.training.load_model(path)
    }

    pub fn current_model(&self) -> Option<Arc<LoadedModel>> {
        self.models.current()
    }

    /// Spawn the inference loop on the current runtime, or on the one
    /// `init` ran under
    ///
    /// Fails with `NoRuntime` when neither exists.
    pub fn start_inference(&self) -> Result<()> {
        match Handle::try_current().ok().or_else(|| self.runtime.clone()) {
            Some(runtime) => self.inference.start_on(&runtime),
            None => Err(EmgError::NoRuntime(
                "start_inference called outside a tokio runtime".to_string(),
            )),
        }
    }

    pub async fn stop_inference(&self) -> Result<()> {
        self.inference.stop(self.config.shutdown_timeout()).await
    }

    pub fn is_inference_running(&self) -> bool {
        self.inference.is_running()
    }

    pub fn inference(&self) -> &InferenceLoop {
        &self.inference
    }

    pub fn inference_stats(&self) -> InferenceStats {
        self.inference.stats()
    }

    /// Stop the loop, wait for every outstanding job, release the worker pool
    ///
    /// Saves, training and predict jobs all count, whether or not their handle
    /// is still held. Fails with `JobTimeout` if they overran
    /// `shutdown_timeout_ms`; the pool is released either way.
    pub async fn teardown(self) -> Result<()> {
        let timeout = self.config.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut timed_out = false;

        if let Err(EmgError::JobTimeout(_)) = self.inference.stop(timeout).await {
            timed_out = true;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if self.workers.wait_idle(remaining).await.is_err() {
            log::warn!(
                "{} job(s) still running after {} ms at shutdown",
                self.workers.registry().active_total(),
                timeout.as_millis()
            );
            timed_out = true;
        }

        self.workers.shutdown();
        log::info!("Session torn down");

        if timed_out {
            Err(EmgError::JobTimeout(timeout.as_millis() as u64))
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inference.cancel();
        self.workers.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn config(num_channels: usize) -> SessionConfig {
        SessionConfig {
            num_channels,
            worker_threads: Some(2),
            inference_period_ms: 10,
            shutdown_timeout_ms: 2000,
            ..Default::default()
        }
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let result = Session::init(config(0));
        assert!(matches!(result, Err(EmgError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_save_recording_emits_event() {
        let session = Session::init(config(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rec.csv");

        let saved = Arc::new(Mutex::new(Vec::new()));
        {
            let saved = Arc::clone(&saved);
            session.on(EventKind::RecordingSaved, move |e| saved.lock().push(e.clone()));
        }

        session.set_label("fist");
        session.set_recording(true);
        for i in 0..4 {
            session.append(0, i as f64).unwrap();
            session.append(1, -(i as f64)).unwrap();
        }

        let rows = session.save_recording(&path).unwrap().wait().await.unwrap();
        assert_eq!(rows, 4);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("label,ch_0,ch_1\nfist,0,-0\n"));
        assert_eq!(
            *saved.lock(),
            vec![Event::RecordingSaved {
                ok: true,
                path: path.clone(),
                rows: 4,
                error: None
            }]
        );

        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_empty_recording_reports_failure() {
        let session = Session::init(config(2)).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");

        let saved = Arc::new(Mutex::new(Vec::new()));
        {
            let saved = Arc::clone(&saved);
            session.on(EventKind::RecordingSaved, move |e| saved.lock().push(e.clone()));
        }

        let result = session.save_recording(&path).unwrap().wait().await;
        assert!(matches!(result, Err(EmgError::EmptyDataset(_))));
        assert!(!path.exists());

        match saved.lock().as_slice() {
            [Event::RecordingSaved { ok, error, .. }] => {
                assert!(!ok);
                assert!(error.is_some());
            }
            other => panic!("unexpected events: {:?}", other),
        };
    }

    #[tokio::test]
    async fn test_teardown_releases_pool_once() {
        let session = Session::init(config(1)).unwrap();
        let workers = Arc::clone(session.workers());

        session.start_inference().unwrap();
        assert!(session.is_inference_running());
        session.teardown().await.unwrap();

        assert!(!workers.is_running());
        assert!(!workers.shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_waits_for_unawaited_save() {
        let session = Session::init(config(2)).unwrap();
        let workers = Arc::clone(session.workers());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.csv");

        let rows = 100_000;
        session.set_label("rest");
        session.set_recording(true);
        for i in 0..rows {
            session.append(0, i as f64).unwrap();
            session.append(1, -(i as f64)).unwrap();
        }

        // handle dropped without awaiting
        drop(session.save_recording(&path).unwrap());
        session.teardown().await.unwrap();

        assert_eq!(workers.registry().active_count(JobKind::SaveRecording), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), rows + 1);
        assert!(!workers.is_running());
    }

    #[tokio::test]
    async fn test_teardown_reports_overrunning_job() {
        let session = Session::init(SessionConfig {
            shutdown_timeout_ms: 50,
            ..config(1)
        })
        .unwrap();
        let workers = Arc::clone(session.workers());

        drop(
            workers
                .submit(JobKind::SaveRecording, "slow", || {
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(())
                })
                .unwrap(),
        );

        assert!(matches!(
            session.teardown().await,
            Err(EmgError::JobTimeout(50))
        ));
        assert!(!workers.is_running());
    }

    #[test]
    fn test_start_inference_outside_runtime_fails() {
        let session = Session::init(config(1)).unwrap();

        assert!(matches!(
            session.start_inference(),
            Err(EmgError::NoRuntime(_))
        ));
        assert!(!session.is_inference_running());
    }

    #[test]
    fn test_start_inference_uses_init_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let session = {
            let _guard = runtime.enter();
            Session::init(config(1)).unwrap()
        };

        // no runtime on this thread; the one captured at init is used
        session.start_inference().unwrap();
        assert!(session.is_inference_running());

        runtime.block_on(session.teardown()).unwrap();
    }

    #[test]
    fn test_drop_releases_pool() {
        let session = Session::init(config(1)).unwrap();
        let workers = Arc::clone(session.workers());
        drop(session);
        assert!(!workers.is_running());
    }
}
