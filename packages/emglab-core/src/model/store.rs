// Currently active classifier
//
// Readers take a cheap `Arc` snapshot; a swap publishes a fully built
// `LoadedModel` in one atomic store, so no reader ever sees a partial one.

use super::Classifier;
use crate::error::Result;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub struct LoadedModel {
    pub id: Uuid,
    pub source: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(classifier: impl Classifier + 'static, source: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            loaded_at: Utc::now(),
            classifier: Box::new(classifier),
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn predict(&self, features: &[f64]) -> Result<String> {
        self.classifier.predict(features)
    }

    pub fn n_features(&self) -> usize {
        self.classifier.n_features()
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("loaded_at", &self.loaded_at)
            .field("n_features", &self.n_features())
            .finish()
    }
}

#[derive(Default)]
pub struct ModelStore {
    current: ArcSwapOption<LoadedModel>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `model`, returning the one it replaced
    pub fn swap(&self, model: LoadedModel) -> Option<Arc<LoadedModel>> {
        let model = Arc::new(model);
        log::info!(
            "Activating model {} ({})",
            model.id,
            model
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string())
        );
        self.current.swap(Some(model))
    }

    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }
}
