// Shared fixtures for unit tests

use crate::error::Result;
use crate::model::Classifier;
use crate::recording::RecordingTable;
use std::time::Duration;

/// Two well separated gestures on two channels, six segments each
pub fn gesture_recording() -> RecordingTable {
    let mut labels = Vec::new();
    let mut ch0 = Vec::new();
    let mut ch1 = Vec::new();

    for rep in 0..6 {
        let jitter = rep as f64 * 0.01;
        for i in 0..20 {
            labels.push("fist".to_string());
            let s = if i % 2 == 0 { 1.0 } else { -1.0 };
            ch0.push(s * (3.0 + jitter));
            ch1.push(0.1 + jitter);
        }
        for i in 0..20 {
            labels.push("rest".to_string());
            ch0.push(0.05 + jitter);
            let s = if i % 4 < 2 { 1.0 } else { -1.0 };
            ch1.push(s * (0.2 + jitter));
        }
    }

    RecordingTable::new(labels, vec![ch0, ch1]).unwrap()
}

/// Classifier that always answers `label`, optionally after a delay
pub struct FixedClassifier {
    pub label: String,
    pub n_features: usize,
    pub delay: Duration,
}

impl FixedClassifier {
    pub fn new(label: &str, n_features: usize) -> Self {
        Self {
            label: label.to_string(),
            n_features,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(label: &str, n_features: usize, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(label, n_features)
        }
    }
}

impl Classifier for FixedClassifier {
    fn predict(&self, _features: &[f64]) -> Result<String> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.label.clone())
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}
