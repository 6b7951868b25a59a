//! EMG acquisition core: per-channel streaming buffers, time-domain feature
//! extraction, and background training / inference with atomic model hand-off.
//!
//! The entry point for an application is [`Session`], which owns every
//! component for one acquisition session. The individual components are public
//! for offline tooling (see the `emglab` CLI) and for embedding.

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod inference;
pub mod jobs;
pub mod model;
mod persist;
pub mod recording;
pub mod session;
pub mod training;

#[cfg(test)]
mod test_support;

pub use buffer::{ChannelBufferPool, ChannelHandle, Ingest, PredictionSnapshot};
pub use config::SessionConfig;
pub use error::{EmgError, Result};
pub use events::{Event, EventBus, EventKind};
pub use features::{extract, FeatureTable, FeatureVector, TrainingSet};
pub use inference::{InferenceLoop, InferenceStats};
pub use jobs::{JobHandle, JobKind, WorkerPool};
pub use model::{
    cross_validate, Classifier, ClassifierKind, CrossValidation, LoadedModel, ModelStore, Pipeline,
};
pub use recording::RecordingTable;
pub use session::Session;
pub use training::{
    train_model, TrainingJobManager, TrainingOptions, TrainingReport, TrainingState,
};
