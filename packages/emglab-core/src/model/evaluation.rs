// Stratified k-fold evaluation of a segment feature table
//
// Features are standardized once over the whole table, then every fold is
// scored by a Gaussian naive Bayes model fitted on the remaining folds. All
// fold predictions are pooled into one confusion matrix.

use super::Standardizer;
use crate::error::{EmgError, Result};
use crate::features::FeatureTable;
use linfa::prelude::*;
use linfa_bayes::GaussianNb;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Class names in order of first appearance in the table
    pub labels: Vec<String>,
    /// `counts[actual][predicted]`
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self {
            labels,
            counts: vec![vec![0; n]; n],
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: usize,
    pub samples: usize,
    pub fold_accuracy: Vec<f64>,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

/// Fold index for every row
///
/// Each class keeps its row order and is cut into `folds` contiguous runs
/// whose sizes differ by at most one, so every fold sees every class in
/// proportion.
pub fn stratified_folds(classes: &[usize], num_classes: usize, folds: usize) -> Vec<usize> {
    let mut class_sizes = vec![0usize; num_classes];
    for &class in classes {
        class_sizes[class] += 1;
    }

    let mut seen = vec![0usize; num_classes];
    classes
        .iter()
        .map(|&class| {
            let position = seen[class];
            seen[class] += 1;
            fold_of(position, class_sizes[class], folds)
        })
        .collect()
}

// First `n % folds` runs are one longer
fn fold_of(position: usize, n: usize, folds: usize) -> usize {
    let base = n / folds;
    let long_runs = n % folds;
    let long_span = long_runs * (base + 1);
    if position < long_span {
        position / (base + 1)
    } else {
        long_runs + (position - long_span) / base
    }
}

pub fn cross_validate(table: &FeatureTable, folds: usize) -> Result<CrossValidation> {
    if folds < 2 {
        return Err(EmgError::InvalidConfig(format!(
            "cross-validation needs at least 2 folds, got {}",
            folds
        )));
    }
    if table.is_empty() {
        return Err(EmgError::EmptyDataset("feature table has no rows".to_string()));
    }

    let mut labels: Vec<String> = Vec::new();
    let classes: Vec<usize> = table
        .labels
        .iter()
        .map(|label| match labels.iter().position(|known| known == label) {
            Some(class) => class,
            None => {
                labels.push(label.clone());
                labels.len() - 1
            }
        })
        .collect();

    if labels.len() < 2 {
        return Err(EmgError::Training(format!(
            "need at least two classes, found {}",
            labels.len()
        )));
    }

    let largest = (0..labels.len())
        .map(|class| classes.iter().filter(|&&c| c == class).count())
        .max()
        .unwrap_or(0);
    if folds > largest {
        return Err(EmgError::InvalidConfig(format!(
            "{} folds requested but the largest class has only {} segments",
            folds, largest
        )));
    }

    let rows = table.len();
    let cols = table.num_features();
    if let Some(bad) = table.rows.iter().position(|r| r.len() != cols) {
        return Err(EmgError::MalformedRecording(format!(
            "row {} has {} features, expected {}",
            bad + 1,
            table.rows[bad].len(),
            cols
        )));
    }
    let flat: Vec<f64> = table.rows.iter().flatten().copied().collect();
    let x = Array2::from_shape_vec((rows, cols), flat)
        .map_err(|e| EmgError::Training(format!("feature matrix: {}", e)))?;
    let x = Standardizer::fit(&x).transform(&x);

    let assignment = stratified_folds(&classes, labels.len(), folds);
    let mut confusion = ConfusionMatrix::new(labels);
    let mut fold_accuracy = Vec::with_capacity(folds);

    for fold in 0..folds {
        let (test_rows, train_rows): (Vec<usize>, Vec<usize>) =
            (0..rows).partition(|&row| assignment[row] == fold);

        let train = Dataset::new(
            x.select(Axis(0), &train_rows),
            Array1::from_iter(train_rows.iter().map(|&row| classes[row])),
        );
        let model = GaussianNb::<f64, usize>::params()
            .fit(&train)
            .map_err(|e| EmgError::Training(format!("fold {}: {}", fold, e)))?;

        let predicted = model.predict(&x.select(Axis(0), &test_rows));

        let mut correct = 0;
        for (&row, &class) in test_rows.iter().zip(predicted.iter()) {
            confusion.counts[classes[row]][class] += 1;
            if classes[row] == class {
                correct += 1;
            }
        }
        let accuracy = correct as f64 / test_rows.len() as f64;
        log::debug!(
            "Fold {}/{}: {} train, {} test, accuracy {:.3}",
            fold + 1,
            folds,
            train_rows.len(),
            test_rows.len(),
            accuracy
        );
        fold_accuracy.push(accuracy);
    }

    Ok(CrossValidation {
        folds,
        samples: rows,
        fold_accuracy,
        accuracy: confusion.accuracy(),
        confusion,
    })
}
