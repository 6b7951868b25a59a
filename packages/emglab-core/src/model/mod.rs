// Classifier pipeline, artifacts, offline evaluation and the active-model store

pub mod evaluation;
pub mod pipeline;
pub mod store;

pub use evaluation::{cross_validate, ConfusionMatrix, CrossValidation, DEFAULT_FOLDS};
pub use pipeline::{
    ClassifierKind, ClassifierModel, LinearSvm, Pipeline, PipelineSummary, Standardizer,
    ARTIFACT_MAGIC,
};
pub use store::{LoadedModel, ModelStore};

use crate::error::Result;

/// Anything that maps a concatenated feature vector to a label
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<String>;

    fn n_features(&self) -> usize;
}
