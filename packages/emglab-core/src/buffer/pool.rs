// Per-channel buffer pool
//
// Each channel owns a display ring, a prediction window and a growable
// recording buffer. `append` is called from the acquisition callback at sensor
// rate: it touches only the target channel's locks and never performs I/O.

use super::ring::{RingBuffer, RingMetrics};
use crate::config::SessionConfig;
use crate::error::{EmgError, Result};
use crate::recording::RecordingTable;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_LABEL: &str = "None";

/// Recording switch and current label, shared with the control surface
pub struct RecordingState {
    active: AtomicBool,
    label: ArcSwap<String>,
}

impl RecordingState {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            label: ArcSwap::from_pointee(DEFAULT_LABEL.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn label(&self) -> Arc<String> {
        self.label.load_full()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.label.store(Arc::new(label.into()));
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new()
    }
}

/// A recorded sample tagged with the label in effect when it arrived
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub label: Arc<String>,
    pub value: f64,
}

/// Copied view of every channel's prediction window
#[derive(Debug, Clone)]
pub struct PredictionSnapshot {
    pub channels: Vec<Vec<f64>>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMetrics {
    pub channel: usize,
    pub display: RingMetrics,
    pub prediction: RingMetrics,
    pub recorded_samples: usize,
}

struct ChannelBuffers {
    display: RingBuffer<f64>,
    prediction: RingBuffer<f64>,
    recording: Mutex<Vec<LabeledSample>>,
}

impl ChannelBuffers {
    fn new(display_capacity: usize, prediction_capacity: usize) -> Self {
        Self {
            display: RingBuffer::new(display_capacity),
            prediction: RingBuffer::new(prediction_capacity),
            recording: Mutex::new(Vec::new()),
        }
    }
}

pub struct ChannelBufferPool {
    channels: Vec<ChannelBuffers>,
    recording: RecordingState,
}

impl ChannelBufferPool {
    pub fn new(num_channels: usize, display_capacity: usize, prediction_capacity: usize) -> Self {
        let channels = (0..num_channels)
            .map(|_| ChannelBuffers::new(display_capacity, prediction_capacity))
            .collect();

        Self {
            channels,
            recording: RecordingState::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.num_channels,
            config.display_capacity,
            config.prediction_capacity,
        )
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, channel: usize) -> Result<&ChannelBuffers> {
        self.channels.get(channel).ok_or(EmgError::InvalidChannel {
            channel,
            num_channels: self.channels.len(),
        })
    }

    /// Push one sample into a channel
    ///
    /// An invalid channel is logged and leaves every buffer untouched.
    pub fn append(&self, channel: usize, value: f64) -> Result<()> {
        let buffers = match self.channel(channel) {
            Ok(buffers) => buffers,
            Err(e) => {
                log::warn!("Dropping sample: {}", e);
                return Err(e);
            }
        };

        buffers.display.push(value);
        buffers.prediction.push(value);

        if self.recording.is_active() {
            let label = self.recording.label();
            buffers.recording.lock().push(LabeledSample { label, value });
        }

        Ok(())
    }

    /// Empty every recording buffer; display and prediction rings are kept
    pub fn clear(&self) {
        for buffers in &self.channels {
            buffers.recording.lock().clear();
        }
        log::info!("Cleared recording buffers ({} channels)", self.channels.len());
    }

    pub fn set_recording(&self, active: bool) {
        self.recording.set_active(active);
        log::info!("Recording {}", if active { "started" } else { "paused" });
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        log::debug!("Recording label set to '{}'", label);
        self.recording.set_label(label);
    }

    pub fn recording_state(&self) -> &RecordingState {
        &self.recording
    }

    pub fn recording_lengths(&self) -> Vec<usize> {
        self.channels
            .iter()
            .map(|buffers| buffers.recording.lock().len())
            .collect()
    }

    /// Copy of one channel's recorded samples
    pub fn recorded_samples(&self, channel: usize) -> Result<Vec<LabeledSample>> {
        Ok(self.channel(channel)?.recording.lock().clone())
    }

    /// Align all recording buffers to the shortest one
    ///
    /// Row labels come from channel 0; the control surface records every
    /// channel under the same labeling.
    pub fn export_recording(&self) -> Result<RecordingTable> {
        let recordings: Vec<Vec<LabeledSample>> = self
            .channels
            .iter()
            .map(|buffers| buffers.recording.lock().clone())
            .collect();

        if let Some(empty) = recordings.iter().position(|r| r.is_empty()) {
            return Err(EmgError::EmptyDataset(format!(
                "channel {} has no recorded samples",
                empty
            )));
        }

        let min_len = recordings.iter().map(Vec::len).min().unwrap_or(0);
        if recordings.is_empty() || min_len == 0 {
            return Err(EmgError::EmptyDataset("nothing recorded".to_string()));
        }

        let labels = recordings[0][..min_len]
            .iter()
            .map(|s| s.label.as_ref().clone())
            .collect();
        let channels = recordings
            .iter()
            .map(|r| r[..min_len].iter().map(|s| s.value).collect())
            .collect();

        RecordingTable::new(labels, channels)
    }

    pub fn export_recording_csv(&self) -> Result<String> {
        self.export_recording()?.to_csv_string()
    }

    pub fn prediction_snapshot(&self) -> PredictionSnapshot {
        PredictionSnapshot {
            channels: self
                .channels
                .iter()
                .map(|buffers| buffers.prediction.snapshot())
                .collect(),
            taken_at: Utc::now(),
        }
    }

    pub fn display_snapshot(&self, channel: usize) -> Result<Vec<f64>> {
        Ok(self.channel(channel)?.display.snapshot())
    }

    pub fn metrics(&self, channel: usize) -> Result<ChannelMetrics> {
        let buffers = self.channel(channel)?;
        Ok(ChannelMetrics {
            channel,
            display: buffers.display.get_metrics(),
            prediction: buffers.prediction.get_metrics(),
            recorded_samples: buffers.recording.lock().len(),
        })
    }

    /// One ingestion handle per channel, indexed by channel number
    pub fn handles(self: &Arc<Self>) -> Vec<ChannelHandle> {
        (0..self.num_channels())
            .map(|channel| ChannelHandle {
                pool: Arc::clone(self),
                channel,
            })
            .collect()
    }
}

/// Sink for a single channel's samples
pub trait Ingest: Send + Sync {
    fn ingest(&self, value: f64);
}

/// Ingestion handle bound to one valid channel of a pool
#[derive(Clone)]
pub struct ChannelHandle {
    pool: Arc<ChannelBufferPool>,
    channel: usize,
}

impl ChannelHandle {
    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl Ingest for ChannelHandle {
    fn ingest(&self, value: f64) {
        // channel was validated when the handle table was built
        let _ = self.pool.append(self.channel, value);
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel)
            .finish()
    }
}
