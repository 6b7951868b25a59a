// Label segmentation and per-segment feature tables

use super::{extract_channels, FEATURES_PER_CHANNEL, FEATURE_NAMES};
use crate::error::{EmgError, Result};
use crate::persist;
use crate::recording::{RecordingTable, LABEL_COLUMN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

/// Maximal run of rows sharing one label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub label: &'a str,
    pub start: usize,
    pub len: usize,
}

impl Segment<'_> {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Split a label column into segments, boundary = label change
pub fn segments(labels: &[String]) -> Vec<Segment<'_>> {
    let mut out: Vec<Segment<'_>> = Vec::new();
    for (row, label) in labels.iter().enumerate() {
        if let Some(current) = out.last_mut().filter(|s| s.label == label.as_str()) {
            current.len += 1;
            continue;
        }
        out.push(Segment {
            label: label.as_str(),
            start: row,
            len: 1,
        });
    }
    out
}

/// One feature row per segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub num_channels: usize,
    pub labels: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn num_features(&self) -> usize {
        self.num_channels * FEATURES_PER_CHANNEL
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.num_features() + 1);
        header.push(LABEL_COLUMN.to_string());
        for channel in 0..self.num_channels {
            header.extend(
                FEATURE_NAMES
                    .iter()
                    .map(|name| format!("{}_{}", name, channel)),
            );
        }
        header
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.header())?;
        for (label, row) in self.labels.iter().zip(self.rows.iter()) {
            let record = std::iter::once(label.clone()).chain(row.iter().map(|v| v.to_string()));
            csv_writer.write_record(record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| EmgError::Serialization(e.to_string()))
    }

    /// Replaces `path` only once the whole table has been written
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(w))
    }

    /// Parse a table written by `write_to`: a `label` column and
    /// `FEATURES_PER_CHANNEL` feature columns per channel, in channel order
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let label_idx = headers
            .iter()
            .position(|h| h == LABEL_COLUMN)
            .ok_or_else(|| {
                EmgError::MalformedRecording(format!("missing '{}' column", LABEL_COLUMN))
            })?;

        let feature_columns: Vec<usize> = (0..headers.len()).filter(|&c| c != label_idx).collect();
        if feature_columns.is_empty() || feature_columns.len() % FEATURES_PER_CHANNEL != 0 {
            return Err(EmgError::MalformedRecording(format!(
                "expected a multiple of {} feature columns, found {}",
                FEATURES_PER_CHANNEL,
                feature_columns.len()
            )));
        }

        let mut table = FeatureTable {
            num_channels: feature_columns.len() / FEATURES_PER_CHANNEL,
            ..Default::default()
        };

        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            table
                .labels
                .push(record.get(label_idx).unwrap_or_default().to_string());

            let values = feature_columns
                .iter()
                .map(|&col| {
                    let raw = record.get(col).unwrap_or("");
                    raw.parse::<f64>().map_err(|_| {
                        EmgError::MalformedRecording(format!(
                            "row {}: '{}' is not a number (column '{}')",
                            row + 1,
                            raw,
                            &headers[col]
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            table.rows.push(values);
        }

        Ok(table)
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read_from(std::io::BufReader::new(file))
    }
}

/// Features of every usable segment of a recording
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub table: FeatureTable,
    /// Segments shorter than two samples, skipped rather than padded
    pub dropped_segments: usize,
}

impl TrainingSet {
    pub fn from_recording(recording: &RecordingTable) -> Result<Self> {
        if recording.is_empty() || recording.num_channels() == 0 {
            return Err(EmgError::EmptyDataset(
                "recording has no rows".to_string(),
            ));
        }

        let mut table = FeatureTable {
            num_channels: recording.num_channels(),
            ..Default::default()
        };
        let mut dropped_segments = 0;

        for segment in segments(&recording.labels) {
            if segment.len < 2 {
                log::debug!(
                    "Dropping segment '{}' at row {} ({} sample)",
                    segment.label,
                    segment.start,
                    segment.len
                );
                dropped_segments += 1;
                continue;
            }

            let windows: Vec<&[f64]> = recording
                .channels
                .iter()
                .map(|channel| &channel[segment.range()])
                .collect();
            table.rows.push(extract_channels(&windows)?);
            table.labels.push(segment.label.to_string());
        }

        if table.is_empty() {
            return Err(EmgError::EmptyDataset(format!(
                "no segment has at least 2 samples ({} dropped)",
                dropped_segments
            )));
        }

        Ok(Self {
            table,
            dropped_segments,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.table.len()
    }

    pub fn num_features(&self) -> usize {
        self.table.num_features()
    }

    /// Distinct labels, sorted
    pub fn classes(&self) -> Vec<String> {
        let mut classes = self.table.labels.clone();
        classes.sort();
        classes.dedup();
        classes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStatistics {
    pub label: String,
    pub segments: usize,
    pub min_len: usize,
    pub max_len: usize,
    /// Rounded to one decimal
    pub avg_len: f64,
}

/// Segment length statistics per label, sorted by label
pub fn segment_statistics(labels: &[String]) -> Vec<LabelStatistics> {
    let mut lengths: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for segment in segments(labels) {
        lengths.entry(segment.label).or_default().push(segment.len);
    }

    lengths
        .into_iter()
        .map(|(label, lens)| {
            let total: usize = lens.iter().sum();
            let avg = total as f64 / lens.len() as f64;
            LabelStatistics {
                label: label.to_string(),
                segments: lens.len(),
                min_len: lens.iter().copied().min().unwrap_or(0),
                max_len: lens.iter().copied().max().unwrap_or(0),
                avg_len: (avg * 10.0).round() / 10.0,
            }
        })
        .collect()
}
