// Background training and model loading
//
// At most one training job runs at a time. The busy flag is claimed with a
// compare-and-swap before submission and released by a guard inside the job,
// so a failing or panicking job still returns the manager to Idle.

use crate::error::{EmgError, Result};
use crate::events::{Event, EventBus};
use crate::features::TrainingSet;
use crate::jobs::{JobHandle, JobKind, WorkerPool};
use crate::model::{ClassifierKind, LoadedModel, ModelStore, Pipeline};
use crate::recording::RecordingTable;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn default_standardize() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrainingOptions {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default = "default_standardize")]
    pub standardize: bool,
    #[serde(default)]
    pub classifier: ClassifierKind,
}

impl TrainingOptions {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            standardize: true,
            classifier: ClassifierKind::default(),
        }
    }

    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierKind) -> Self {
        self.classifier = classifier;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Idle,
    Training,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub output_path: PathBuf,
    pub classifier: ClassifierKind,
    pub standardized: bool,
    pub num_channels: usize,
    pub samples: usize,
    pub dropped_segments: usize,
    pub classes: Vec<String>,
    pub elapsed_ms: u64,
}

/// Read a recording CSV, fit a pipeline and write the artifact
///
/// With `expected_channels` set, a recording of a different width is rejected
/// before fitting.
pub fn train_model(
    options: &TrainingOptions,
    expected_channels: Option<usize>,
) -> Result<TrainingReport> {
    let started = Instant::now();
    let recording = RecordingTable::read_csv(&options.input_path)?;

    if let Some(channels) = expected_channels {
        if recording.num_channels() != channels {
            return Err(EmgError::FeatureCountMismatch {
                expected: channels,
                actual: recording.num_channels(),
            });
        }
    }

    let set = TrainingSet::from_recording(&recording)?;
    if set.dropped_segments > 0 {
        log::warn!(
            "Dropped {} segment(s) shorter than 2 samples from {}",
            set.dropped_segments,
            options.input_path.display()
        );
    }

    let pipeline = Pipeline::fit(&set, options.standardize, options.classifier)?;
    pipeline.save(&options.output_path)?;

    let report = TrainingReport {
        output_path: options.output_path.clone(),
        classifier: options.classifier,
        standardized: options.standardize,
        num_channels: pipeline.num_channels,
        samples: set.num_samples(),
        dropped_segments: set.dropped_segments,
        classes: set.classes(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    log::info!(
        "Trained {} on {} segments ({} classes) in {} ms",
        report.classifier,
        report.samples,
        report.classes.len(),
        report.elapsed_ms
    );
    Ok(report)
}

/// Releases the busy flag and publishes completion, also on unwind
struct CompletionGuard {
    busy: Arc<AtomicBool>,
    events: Arc<EventBus>,
    outcome: Option<std::result::Result<(), String>>,
}

impl CompletionGuard {
    fn finish(&mut self, result: &Result<TrainingReport>) {
        self.outcome = Some(match result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.events.emit(Event::TrainingStateChanged { busy: false });

        let (ok, error) = match self.outcome.take() {
            Some(Ok(())) => (true, None),
            Some(Err(e)) => (false, Some(e)),
            None => (false, Some("training job panicked".to_string())),
        };
        self.events.emit(Event::TrainingCompleted { ok, error });
    }
}

pub struct TrainingJobManager {
    busy: Arc<AtomicBool>,
    workers: Arc<WorkerPool>,
    events: Arc<EventBus>,
    models: Arc<ModelStore>,
    num_channels: usize,
    last_job: Mutex<Option<JobHandle<TrainingReport>>>,
}

impl TrainingJobManager {
    pub fn new(
        workers: Arc<WorkerPool>,
        events: Arc<EventBus>,
        models: Arc<ModelStore>,
        num_channels: usize,
    ) -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            workers,
            events,
            models,
            num_channels,
            last_job: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TrainingState {
        if self.is_busy() {
            TrainingState::Training
        } else {
            TrainingState::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Submit a training job, or fail with `Busy` if one is running
    pub fn start_training(&self, options: TrainingOptions) -> Result<Uuid> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Training request rejected: a job is already running");
            return Err(EmgError::Busy);
        }

        self.events.emit(Event::TrainingStateChanged { busy: true });
        log::info!(
            "Training {} on {} -> {}",
            options.classifier,
            options.input_path.display(),
            options.output_path.display()
        );

        let busy = Arc::clone(&self.busy);
        let events = Arc::clone(&self.events);
        let num_channels = self.num_channels;
        let name = format!("train {}", options.input_path.display());

        let submitted = self.workers.submit(JobKind::Training, name, move || {
            let mut guard = CompletionGuard {
                busy,
                events,
                outcome: None,
            };
            let result = train_model(&options, Some(num_channels));
            guard.finish(&result);
            result
        });

        match submitted {
            Ok(handle) => {
                let id = handle.id;
                *self.last_job.lock() = Some(handle);
                Ok(id)
            }
            Err(e) => {
                // job never ran, so its guard never existed
                self.busy.store(false, Ordering::Release);
                self.events.emit(Event::TrainingStateChanged { busy: false });
                self.events.emit(Event::TrainingCompleted {
                    ok: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Await the most recent training job
    ///
    /// Returns `Ok(None)` if there is nothing to wait for.
    pub async fn join(&self, timeout: Duration) -> Result<Option<TrainingReport>> {
        let handle = self.last_job.lock().take();
        match handle {
            Some(handle) => handle.wait_timeout(timeout).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load and activate an artifact; the current model is kept on failure
    pub fn load_model(&self, path: impl AsRef<Path>) -> Result<Uuid> {
        let path = path.as_ref();
        let pipeline = match Pipeline::load(path, Some(self.num_channels)) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("Model {} rejected: {}", path.display(), e);
                return Err(e);
            }
        };

        let model = LoadedModel::new(pipeline, Some(path.to_path_buf()));
        let id = model.id;
        self.models.swap(model);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::test_support::gesture_recording;
    use std::sync::mpsc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        input: PathBuf,
        output: PathBuf,
        events: Arc<EventBus>,
        models: Arc<ModelStore>,
        workers: Arc<WorkerPool>,
        seen: Arc<Mutex<Vec<Event>>>,
    }

    fn fixture(threads: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("recording.csv");
        let output = dir.path().join("model.emgm");
        gesture_recording().write_csv(&input).unwrap();

        let events = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::TrainingStateChanged, EventKind::TrainingCompleted] {
            let seen = Arc::clone(&seen);
            events.subscribe(kind, move |event| seen.lock().push(event.clone()));
        }

        Fixture {
            _dir: dir,
            input,
            output,
            events,
            models: Arc::new(ModelStore::new()),
            workers: Arc::new(WorkerPool::new(threads).unwrap()),
            seen,
        }
    }

    fn new_manager(f: &Fixture, channels: usize) -> TrainingJobManager {
        TrainingJobManager::new(
            Arc::clone(&f.workers),
            Arc::clone(&f.events),
            Arc::clone(&f.models),
            channels,
        )
    }

    #[tokio::test]
    async fn test_concurrent_start_only_one_runs() {
        let f = fixture(1);
        let manager = new_manager(&f, 2);

        // occupy the only worker so the training job stays queued
        let (release, gate) = mpsc::channel::<()>();
        let blocker = f
            .workers
            .submit(JobKind::Predict, "gate", move || {
                let _ = gate.recv();
                Ok(())
            })
            .unwrap();

        let results: Vec<Result<Uuid>> = std::thread::scope(|s| {
            let a = s.spawn(|| manager.start_training(TrainingOptions::new(&f.input, &f.output)));
            let b = s.spawn(|| manager.start_training(TrainingOptions::new(&f.input, &f.output)));
            vec![a.join().unwrap(), b.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(EmgError::Busy)))
                .count(),
            1
        );
        assert_eq!(manager.state(), TrainingState::Training);

        release.send(()).unwrap();
        blocker.wait().await.unwrap();

        let report = manager
            .join(Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.classes, vec!["fist", "rest"]);
        assert_eq!(manager.state(), TrainingState::Idle);
        assert!(f.output.exists());

        let seen = f.seen.lock();
        assert_eq!(
            *seen,
            vec![
                Event::TrainingStateChanged { busy: true },
                Event::TrainingStateChanged { busy: false },
                Event::TrainingCompleted {
                    ok: true,
                    error: None
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_training_returns_to_idle() {
        let f = fixture(1);
        let manager = new_manager(&f, 2);

        let options = TrainingOptions::new(f.input.with_file_name("missing.csv"), &f.output);
        manager.start_training(options).unwrap();

        assert!(matches!(
            manager.join(Duration::from_secs(10)).await,
            Err(EmgError::Io(_))
        ));
        assert_eq!(manager.state(), TrainingState::Idle);

        let seen = f.seen.lock();
        match seen.last() {
            Some(Event::TrainingCompleted { ok, error }) => {
                assert!(!ok);
                assert!(error.is_some());
            }
            other => panic!("unexpected last event: {:?}", other),
        }

        // a new job may start afterwards
        drop(seen);
        manager
            .start_training(TrainingOptions::new(&f.input, &f.output))
            .unwrap();
        manager.join(Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_count_mismatch_fails() {
        let f = fixture(1);
        let manager = new_manager(&f, 3);

        manager
            .start_training(TrainingOptions::new(&f.input, &f.output))
            .unwrap();
        assert!(matches!(
            manager.join(Duration::from_secs(10)).await,
            Err(EmgError::FeatureCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(!f.output.exists());
    }

    #[tokio::test]
    async fn test_start_after_pool_shutdown() {
        let f = fixture(1);
        let manager = new_manager(&f, 2);
        f.workers.shutdown();

        let result = manager.start_training(TrainingOptions::new(&f.input, &f.output));
        assert!(matches!(result, Err(EmgError::PoolShutDown)));
        assert!(!manager.is_busy());
        assert!(manager.join(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[test]
    fn test_load_model_keeps_previous_on_failure() {
        let f = fixture(1);
        let manager = new_manager(&f, 2);

        let report = train_model(&TrainingOptions::new(&f.input, &f.output), None).unwrap();
        assert_eq!(report.num_channels, 2);

        let id = manager.load_model(&f.output).unwrap();
        assert_eq!(f.models.current().unwrap().id, id);

        let corrupt = f.output.with_file_name("corrupt.emgm");
        std::fs::write(&corrupt, b"EMGM not really a model").unwrap();
        assert!(matches!(
            manager.load_model(&corrupt),
            Err(EmgError::ModelLoad(_))
        ));
        assert_eq!(f.models.current().unwrap().id, id);

        let other_width = new_manager(&f, 4);
        assert!(matches!(
            other_width.load_model(&f.output),
            Err(EmgError::ModelLoad(_))
        ));
        assert_eq!(f.models.current().unwrap().id, id);
    }

    #[test]
    fn test_options_serde_defaults() {
        let options: TrainingOptions =
            serde_json::from_str(r#"{"input_path": "in.csv", "output_path": "out.emgm"}"#)
                .unwrap();
        assert!(options.standardize);
        assert_eq!(options.classifier, ClassifierKind::LinearSvm);

        let options: TrainingOptions = serde_json::from_str(
            r#"{"input_path": "a", "output_path": "b", "standardize": false, "classifier": "linear_svm"}"#,
        )
        .unwrap();
        assert!(!options.standardize);
    }
}
