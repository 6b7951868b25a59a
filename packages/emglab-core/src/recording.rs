// Labeled multi-channel recording table
//
// In-memory form of the recording export: one label column followed by one
// column per channel. Used both for writing the export and for reading it back
// as training input.

use crate::error::{EmgError, Result};
use crate::persist;
use std::io::{Read, Write};
use std::path::Path;

pub const LABEL_COLUMN: &str = "label";
pub const CHANNEL_PREFIX: &str = "ch_";
// Column prefix written by older acquisition builds
const LEGACY_CHANNEL_PREFIX: &str = "emg_";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingTable {
    pub labels: Vec<String>,
    /// One sample vector per channel, each the same length as `labels`
    pub channels: Vec<Vec<f64>>,
}

impl RecordingTable {
    pub fn new(labels: Vec<String>, channels: Vec<Vec<f64>>) -> Result<Self> {
        if let Some((idx, ch)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != labels.len())
        {
            return Err(EmgError::MalformedRecording(format!(
                "channel {} has {} samples but there are {} labels",
                idx,
                ch.len(),
                labels.len()
            )));
        }
        Ok(Self { labels, channels })
    }

    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        std::iter::once(LABEL_COLUMN.to_string())
            .chain((0..self.num_channels()).map(|i| format!("{}{}", CHANNEL_PREFIX, i)))
            .collect()
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.header())?;

        for (row, label) in self.labels.iter().enumerate() {
            let mut record = Vec::with_capacity(self.num_channels() + 1);
            record.push(label.clone());
            record.extend(self.channels.iter().map(|ch| ch[row].to_string()));
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| EmgError::MalformedRecording(e.to_string()))
    }

    /// Replaces `path` only once the whole table has been written
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(w))
    }

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
        let channel_columns = channel_columns(&headers)?;

        let mut labels = Vec::new();
        let mut channels = vec![Vec::new(); channel_columns.len()];

        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            let label = record.get(label_idx).ok_or_else(|| {
                EmgError::MalformedRecording(format!("row {} has no label", row + 1))
            })?;
            labels.push(label.to_string());

            for (channel, &col) in channels.iter_mut().zip(channel_columns.iter()) {
                let raw = record.get(col).unwrap_or("");
                let value: f64 = raw.parse().map_err(|_| {
                    EmgError::MalformedRecording(format!(
                        "row {}: '{}' is not a number (column '{}')",
                        row + 1,
                        raw,
                        &headers[col]
                    ))
                })?;
                channel.push(value);
            }
        }

        Ok(Self { labels, channels })
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let table = Self::read_from(std::io::BufReader::new(file))?;
        log::debug!(
            "Read recording {}: {} rows x {} channels",
            path.display(),
            table.num_rows(),
            table.num_channels()
        );
        Ok(table)
    }
}

/// Column positions of the channel columns, ordered by channel index
fn channel_columns(headers: &csv::StringRecord) -> Result<Vec<usize>> {
    let mut indexed: Vec<(usize, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(col, name)| {
            name.strip_prefix(CHANNEL_PREFIX)
                .or_else(|| name.strip_prefix(LEGACY_CHANNEL_PREFIX))
                .and_then(|suffix| suffix.parse::<usize>().ok())
                .map(|channel| (channel, col))
        })
        .collect();

    if indexed.is_empty() {
        return Err(EmgError::MalformedRecording(
            "no channel columns found".to_string(),
        ));
    }

    indexed.sort_unstable();
    for (expected, (channel, _)) in indexed.iter().enumerate() {
        if *channel != expected {
            return Err(EmgError::MalformedRecording(format!(
                "channel columns must be numbered 0..{} without gaps",
                indexed.len()
            )));
        }
    }

    Ok(indexed.into_iter().map(|(_, col)| col).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> RecordingTable {
        RecordingTable::new(
            vec!["fist".into(), "fist".into(), "open".into()],
            vec![vec![1.0, -0.5, 2.25], vec![0.0, 3.0, -1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_csv_layout() {
        let csv = sample_table().to_csv_string().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "label,ch_0,ch_1");
        assert_eq!(lines[1], "fist,1,0");
        assert_eq!(lines[2], "fist,-0.5,3");
        assert_eq!(lines[3], "open,2.25,-1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_read_back() {
        let table = sample_table();
        let csv = table.to_csv_string().unwrap();
        let parsed = RecordingTable::read_from(csv.as_bytes()).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_legacy_columns_and_reordering() {
        let csv = "emg_1,label,extra,emg_0\n5,a,x,1\n6,b,y,2\n";
        let table = RecordingTable::read_from(csv.as_bytes()).unwrap();
        assert_eq!(table.labels, vec!["a", "b"]);
        assert_eq!(table.channels, vec![vec![1.0, 2.0], vec![5.0, 6.0]]);
    }

    #[test]
    fn test_malformed_inputs() {
        let missing_label = "ch_0,ch_1\n1,2\n";
        assert!(matches!(
            RecordingTable::read_from(missing_label.as_bytes()),
            Err(EmgError::MalformedRecording(_))
        ));

        let gap = "label,ch_0,ch_2\na,1,2\n";
        assert!(matches!(
            RecordingTable::read_from(gap.as_bytes()),
            Err(EmgError::MalformedRecording(_))
        ));

        let not_a_number = "label,ch_0\na,abc\n";
        assert!(matches!(
            RecordingTable::read_from(not_a_number.as_bytes()),
            Err(EmgError::MalformedRecording(_))
        ));

        assert!(RecordingTable::new(vec!["a".into()], vec![vec![]]).is_err());
    }
}
