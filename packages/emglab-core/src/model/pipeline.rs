// Fitted classification pipeline and its on-disk artifact
//
// Artifact layout: b"EMGM" followed by an LZ4 (size-prepended) compressed
// MessagePack document of `Pipeline`.

use super::Classifier;
use crate::error::{EmgError, Result};
use crate::features::{TrainingSet, FEATURES_PER_CHANNEL};
use crate::persist;
use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_svm::Svm;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

pub const ARTIFACT_MAGIC: &[u8; 4] = b"EMGM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    LinearSvm,
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierKind::LinearSvm => write!(f, "linear_svm"),
        }
    }
}

/// Per-feature z-score scaling fitted on the training matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Standardizer {
    /// Population statistics; zero-variance columns keep a scale of 1
    pub fn fit(x: &Array2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });

        Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mean = Array1::from_vec(self.mean.clone());
        let scale = Array1::from_vec(self.scale.clone());
        (x - &mean) / &scale
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    fn is_finite(&self) -> bool {
        self.mean.iter().chain(self.scale.iter()).all(|v| v.is_finite())
    }
}

/// One-vs-rest linear SVM; decision for class k is `w_k . x - rho_k`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    pub classes: Vec<String>,
    pub weights: Vec<Vec<f64>>,
    pub rho: Vec<f64>,
}

impl LinearSvm {
    pub fn fit(x: &Array2<f64>, labels: &[String]) -> Result<Self> {
        let mut classes: Vec<String> = labels.to_vec();
        classes.sort();
        classes.dedup();

        if classes.len() < 2 {
            return Err(EmgError::Training(format!(
                "need at least two classes, found {}",
                classes.len()
            )));
        }

        let mut weights = Vec::with_capacity(classes.len());
        let mut rho = Vec::with_capacity(classes.len());

        for class in &classes {
            let targets = Array1::from_iter(labels.iter().map(|l| l == class));
            let dataset = Dataset::new(x.clone(), targets);

            let svm = Svm::<_, bool>::params()
                .linear_kernel()
                .fit(&dataset)
                .map_err(|e| EmgError::Training(format!("SVM fit for '{}': {}", class, e)))?;

            // w = sum(alpha_i * x_i)
            let mut w = Array1::<f64>::zeros(x.ncols());
            for (i, &alpha_i) in svm.alpha.iter().enumerate() {
                w.scaled_add(alpha_i, &x.row(i));
            }

            weights.push(w.to_vec());
            rho.push(svm.rho);
        }

        Ok(Self {
            classes,
            weights,
            rho,
        })
    }

    pub fn decision_function(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(self.rho.iter())
            .map(|(w, rho)| w.iter().zip(x).map(|(a, b)| a * b).sum::<f64>() - rho)
            .collect()
    }

    pub fn predict(&self, x: &[f64]) -> Result<String> {
        let scores = self.decision_function(x);
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| self.classes[idx].clone())
            .ok_or_else(|| EmgError::Training("classifier has no classes".to_string()))
    }

    fn is_consistent(&self, num_features: usize) -> bool {
        !self.classes.is_empty()
            && self.weights.len() == self.classes.len()
            && self.rho.len() == self.classes.len()
            && self.weights.iter().all(|w| w.len() == num_features)
            && self
                .weights
                .iter()
                .flatten()
                .chain(self.rho.iter())
                .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassifierModel {
    LinearSvm(LinearSvm),
}

impl ClassifierModel {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            ClassifierModel::LinearSvm(_) => ClassifierKind::LinearSvm,
        }
    }

    pub fn classes(&self) -> &[String] {
        match self {
            ClassifierModel::LinearSvm(svm) => &svm.classes,
        }
    }

    fn predict(&self, x: &[f64]) -> Result<String> {
        match self {
            ClassifierModel::LinearSvm(svm) => svm.predict(x),
        }
    }

    fn is_consistent(&self, num_features: usize) -> bool {
        match self {
            ClassifierModel::LinearSvm(svm) => svm.is_consistent(num_features),
        }
    }
}

/// Optional standardizer followed by a classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub num_channels: usize,
    pub standardizer: Option<Standardizer>,
    pub classifier: ClassifierModel,
    pub training_samples: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub kind: ClassifierKind,
    pub classes: Vec<String>,
    pub num_channels: usize,
    pub num_features: usize,
    pub standardized: bool,
    pub training_samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl Pipeline {
    /// Fit on a training set; standardization statistics come from it alone
    pub fn fit(set: &TrainingSet, standardize: bool, kind: ClassifierKind) -> Result<Self> {
        let rows = set.num_samples();
        let cols = set.num_features();
        let flat: Vec<f64> = set.table.rows.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| EmgError::Training(format!("feature matrix: {}", e)))?;

        let standardizer = standardize.then(|| Standardizer::fit(&x));
        let x = match &standardizer {
            Some(s) => s.transform(&x),
            None => x,
        };

        let classifier = match kind {
            ClassifierKind::LinearSvm => {
                ClassifierModel::LinearSvm(LinearSvm::fit(&x, &set.table.labels)?)
            }
        };

        Ok(Self {
            num_channels: set.table.num_channels,
            standardizer,
            classifier,
            training_samples: rows,
            trained_at: Utc::now(),
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_channels * FEATURES_PER_CHANNEL
    }

    pub fn predict(&self, features: &[f64]) -> Result<String> {
        if features.len() != self.num_features() {
            return Err(EmgError::FeatureCountMismatch {
                expected: self.num_features(),
                actual: features.len(),
            });
        }

        match &self.standardizer {
            Some(s) => self.classifier.predict(&s.transform_row(features)),
            None => self.classifier.predict(features),
        }
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            kind: self.classifier.kind(),
            classes: self.classifier.classes().to_vec(),
            num_channels: self.num_channels,
            num_features: self.num_features(),
            standardized: self.standardizer.is_some(),
            training_samples: self.training_samples,
            trained_at: self.trained_at,
        }
    }

    /// Structural checks applied to every decoded artifact
    pub fn validate(&self, expected_channels: Option<usize>) -> Result<()> {
        if let Some(channels) = expected_channels {
            if self.num_channels != channels {
                return Err(EmgError::FeatureCountMismatch {
                    expected: channels * FEATURES_PER_CHANNEL,
                    actual: self.num_features(),
                });
            }
        }

        let num_features = self.num_features();
        if num_features == 0 {
            return Err(EmgError::ModelLoad("model has no input features".to_string()));
        }

        if let Some(s) = &self.standardizer {
            if s.mean.len() != num_features || s.scale.len() != num_features || !s.is_finite() {
                return Err(EmgError::ModelLoad(
                    "standardizer parameters are inconsistent".to_string(),
                ));
            }
        }

        if !self.classifier.is_consistent(num_features) {
            return Err(EmgError::ModelLoad(
                "classifier weights are missing or not finite".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let msgpack_bytes = rmp_serde::to_vec_named(self)?;
        let compressed = lz4_flex::compress_prepend_size(&msgpack_bytes);

        let mut bytes = Vec::with_capacity(ARTIFACT_MAGIC.len() + compressed.len());
        bytes.extend_from_slice(ARTIFACT_MAGIC);
        bytes.extend_from_slice(&compressed);
        Ok(bytes)
    }

    /// Decode and validate an artifact; every failure is a `ModelLoad` error
    pub fn from_bytes(bytes: &[u8], expected_channels: Option<usize>) -> Result<Self> {
        let payload = bytes
            .strip_prefix(ARTIFACT_MAGIC.as_slice())
            .ok_or_else(|| EmgError::ModelLoad("not a model artifact (bad magic)".to_string()))?;

        let decompressed = lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| EmgError::ModelLoad(format!("LZ4 decompression failed: {}", e)))?;

        let pipeline: Pipeline = rmp_serde::from_slice(&decompressed)
            .map_err(|e| EmgError::ModelLoad(format!("MessagePack decode failed: {}", e)))?;

        pipeline
            .validate(expected_channels)
            .map_err(|e| match e {
                EmgError::ModelLoad(_) => e,
                other => EmgError::ModelLoad(other.to_string()),
            })?;

        Ok(pipeline)
    }

    /// Write to a temporary sibling file, then rename over `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        persist::write_atomic(path, |w| Ok(w.write_all(&bytes)?))?;

        log::info!(
            "Saved model to {} ({} bytes, {} classes)",
            path.display(),
            bytes.len(),
            self.classifier.classes().len()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, expected_channels: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| EmgError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes, expected_channels)
    }
}

impl Classifier for Pipeline {
    fn predict(&self, features: &[f64]) -> Result<String> {
        Pipeline::predict(self, features)
    }

    fn n_features(&self) -> usize {
        self.num_features()
    }
}
