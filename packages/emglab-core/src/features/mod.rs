// Time-domain EMG features
//
// Four features per window: mean absolute amplitude, mean waveform length,
// slope-sign-change rate and zero-crossing rate. Multi-channel vectors are
// the per-channel vectors concatenated in channel order.

pub mod segment;

pub use segment::{
    segment_statistics, segments, FeatureTable, LabelStatistics, Segment, TrainingSet,
};

use crate::error::{EmgError, Result};
use serde::{Deserialize, Serialize};

pub const FEATURES_PER_CHANNEL: usize = 4;

/// Short names used for feature columns, in vector order
pub const FEATURE_NAMES: [&str; FEATURES_PER_CHANNEL] = ["maa", "mwl", "msc", "mzc"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mean_abs_amplitude: f64,
    pub waveform_length: f64,
    pub slope_sign_changes: f64,
    pub zero_crossings: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURES_PER_CHANNEL] {
        [
            self.mean_abs_amplitude,
            self.waveform_length,
            self.slope_sign_changes,
            self.zero_crossings,
        ]
    }
}

// +0.0 -> +1, -0.0 -> -1
#[inline]
fn sign(x: f64) -> f64 {
    1.0f64.copysign(x)
}

/// Extract the feature vector of a single window
pub fn extract(window: &[f64]) -> Result<FeatureVector> {
    let len = window.len();
    if len < 2 {
        return Err(EmgError::WindowTooShort { len });
    }
    let n = len as f64;

    let mean_abs_amplitude = window.iter().map(|x| x.abs()).sum::<f64>() / n;

    let waveform_length = window
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).abs())
        .sum::<f64>()
        / (n - 1.0);

    let slope_changes = window
        .windows(3)
        .filter(|w| sign(w[1] - w[0]) != sign(w[2] - w[1]))
        .count();

    let zero_crossings = window
        .windows(2)
        .filter(|pair| sign(pair[1]) != sign(pair[0]))
        .count();

    Ok(FeatureVector {
        mean_abs_amplitude,
        waveform_length,
        slope_sign_changes: slope_changes as f64 / n,
        zero_crossings: zero_crossings as f64 / n,
    })
}

/// Extract and concatenate features for one window per channel
pub fn extract_channels<W: AsRef<[f64]>>(windows: &[W]) -> Result<Vec<f64>> {
    let mut features = Vec::with_capacity(windows.len() * FEATURES_PER_CHANNEL);
    for window in windows {
        features.extend_from_slice(&extract(window.as_ref())?.to_array());
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn assert_close(actual: [f64; 4], expected: [f64; 4]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < TOLERANCE, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_reference_window() {
        let features = extract(&[1.0, -1.0, 1.0, -1.0]).unwrap();
        assert_close(features.to_array(), [1.0, 2.0, 0.5, 0.75]);
    }

    #[test]
    fn test_short_windows() {
        assert!(matches!(
            extract(&[]),
            Err(EmgError::WindowTooShort { len: 0 })
        ));
        assert!(matches!(
            extract(&[3.0]),
            Err(EmgError::WindowTooShort { len: 1 })
        ));

        // no interior points, still divided by the full length
        let features = extract(&[2.0, -2.0]).unwrap();
        assert_close(features.to_array(), [2.0, 4.0, 0.0, 0.5]);
    }

    #[test]
    fn test_constant_window() {
        let features = extract(&[0.5; 10]).unwrap();
        assert_close(features.to_array(), [0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_signed_zero() {
        // -0.0 counts as negative
        let features = extract(&[0.0, -0.0, 0.0]).unwrap();
        assert!((features.zero_crossings - 2.0 / 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_deterministic() {
        let window: Vec<f64> = (0..700).map(|i| ((i as f64) * 0.37).sin()).collect();
        assert_eq!(extract(&window).unwrap(), extract(&window).unwrap());
    }

    #[test]
    fn test_extract_channels_concatenates_in_order() {
        let windows = vec![vec![1.0, -1.0, 1.0, -1.0], vec![0.5; 4]];
        let features = extract_channels(&windows).unwrap();
        assert_eq!(features.len(), 2 * FEATURES_PER_CHANNEL);
        assert_close(
            [features[0], features[1], features[2], features[3]],
            [1.0, 2.0, 0.5, 0.75],
        );
        assert_close(
            [features[4], features[5], features[6], features[7]],
            [0.5, 0.0, 0.0, 0.0],
        );

        let with_short = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(extract_channels(&with_short).is_err());
    }
}
