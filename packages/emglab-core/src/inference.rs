// Periodic inference scheduler
//
// Each tick snapshots the prediction windows, extracts features and submits
// one predict job. A tick that finds the previous job still running is
// skipped, never queued, so at most one predict job is outstanding.

use crate::buffer::ChannelBufferPool;
use crate::error::{EmgError, Result};
use crate::events::{Event, EventBus};
use crate::features::extract_channels;
use crate::jobs::{JobHandle, JobKind, WorkerPool};
use crate::model::ModelStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceStats {
    pub ticks: u64,
    pub predictions: u64,
    pub skipped_busy: u64,
    pub skipped_no_model: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Submitted(Uuid),
    SkippedNoModel,
    SkippedBusy,
    Failed,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    predictions: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_no_model: AtomicU64,
    failures: AtomicU64,
    outstanding: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct Shared {
    buffers: Arc<ChannelBufferPool>,
    models: Arc<ModelStore>,
    workers: Arc<WorkerPool>,
    events: Arc<EventBus>,
    in_flight: AtomicBool,
    counters: Counters,
    last_job: Mutex<Option<JobHandle<String>>>,
}

/// Clears the in-flight slot when a predict job ends, also on unwind
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

impl Shared {
    fn tick(self: &Arc<Self>) -> TickOutcome {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let model = match self.models.current() {
            Some(model) => model,
            None => {
                self.counters.skipped_no_model.fetch_add(1, Ordering::Relaxed);
                log::trace!("Inference tick skipped: no model loaded");
                return TickOutcome::SkippedNoModel;
            }
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.skipped_busy.fetch_add(1, Ordering::Relaxed);
            log::debug!("Inference tick skipped: previous prediction still running");
            return TickOutcome::SkippedBusy;
        }

        let snapshot = self.buffers.prediction_snapshot();
        let features = match extract_channels(&snapshot.channels) {
            Ok(features) => features,
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("Inference tick skipped: {}", e);
                return TickOutcome::Failed;
            }
        };

        let outstanding = self.counters.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .max_in_flight
            .fetch_max(outstanding, Ordering::AcqRel);

        let guard = InFlightGuard {
            shared: Arc::clone(self),
        };
        let submitted = self.workers.submit(JobKind::Predict, "predict", move || {
            let guard = guard;
            let shared = &guard.shared;
            match model.predict(&features) {
                Ok(label) => {
                    shared.counters.predictions.fetch_add(1, Ordering::Relaxed);
                    shared.events.emit(Event::PredictionUpdated {
                        label: label.clone(),
                    });
                    Ok(label)
                }
                Err(e) => {
                    shared.counters.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Prediction failed: {}", e);
                    Err(e)
                }
            }
        });

        match submitted {
            Ok(handle) => {
                let id = handle.id;
                *self.last_job.lock() = Some(handle);
                TickOutcome::Submitted(id)
            }
            Err(e) => {
                // the closure and its guard were dropped, releasing the slot
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Predict job not submitted: {}", e);
                TickOutcome::Failed
            }
        }
    }
}

pub struct InferenceLoop {
    shared: Arc<Shared>,
    period: Duration,
    cancel_token: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InferenceLoop {
    pub fn new(
        buffers: Arc<ChannelBufferPool>,
        models: Arc<ModelStore>,
        workers: Arc<WorkerPool>,
        events: Arc<EventBus>,
        period: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffers,
                models,
                workers,
                events,
                in_flight: AtomicBool::new(false),
                counters: Counters::default(),
                last_job: Mutex::new(None),
            }),
            period,
            cancel_token: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Run a single tick on the calling thread
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the periodic task on the current tokio runtime
    ///
    /// Fails with `NoRuntime` when called outside a runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| EmgError::NoRuntime(e.to_string()))?;
        self.start_on(&runtime)
    }

    /// Spawn the periodic task on `runtime`
    pub fn start_on(&self, runtime: &Handle) -> Result<()> {
        let mut task_slot = self.task.lock();
        if task_slot.as_ref().is_some_and(|task| !task.is_finished()) {
            log::debug!("Inference loop already running");
            return Ok(());
        }

        let cancel_token = CancellationToken::new();
        *self.cancel_token.lock() = Some(cancel_token.clone());

        let shared = Arc::clone(&self.shared);
        let period = self.period;

        *task_slot = Some(runtime.spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        log::info!("Inference loop cancelled");
                        break;
                    }

                    _ = tick.tick() => {
                        shared.tick();
                    }
                }
            }
        }));

        log::info!("Inference loop started (period {} ms)", period.as_millis());
        Ok(())
    }

    /// Stop producing ticks without waiting
    pub fn cancel(&self) {
        if let Some(token) = self.cancel_token.lock().take() {
            token.cancel();
        }
    }

    /// Stop producing ticks, then wait up to `timeout` for the last predict job
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let cancel_token = self.cancel_token.lock().take();
        let task = self.task.lock().take();

        if let Some(token) = cancel_token {
            token.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Inference task ended abnormally: {}", e);
            }
        }

        let pending = self.shared.last_job.lock().take();
        if let Some(handle) = pending {
            if let Err(EmgError::JobTimeout(ms)) = handle.wait_timeout(timeout).await {
                log::warn!("Predict job still running after {} ms at shutdown", ms);
                return Err(EmgError::JobTimeout(ms));
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> InferenceStats {
        let c = &self.shared.counters;
        InferenceStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            predictions: c.predictions.load(Ordering::Relaxed),
            skipped_busy: c.skipped_busy.load(Ordering::Relaxed),
            skipped_no_model: c.skipped_no_model.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Highest number of predict jobs ever outstanding at once
    pub fn max_in_flight(&self) -> usize {
        self.shared.counters.max_in_flight.load(Ordering::Acquire)
    }
}
