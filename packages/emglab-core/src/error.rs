use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmgError {
    #[error("Invalid channel {channel} (pool has {num_channels} channels)")]
    InvalidChannel { channel: usize, num_channels: usize },

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Window too short: {len} samples (need at least 2)")]
    WindowTooShort { len: usize },

    #[error("Training job already running")]
    Busy,

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Feature count mismatch: model expects {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed recording: {0}")]
    MalformedRecording(String),

    #[error("Job panicked: {0}")]
    JobPanicked(String),

    #[error("Job did not finish within {0} ms")]
    JobTimeout(u64),

    #[error("Job result was dropped before completion")]
    JobDropped,

    #[error("Worker pool has been shut down")]
    PoolShutDown,

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for EmgError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EmgError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EmgError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EmgError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EmgError {
    fn from(e: serde_json::Error) -> Self {
        EmgError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EmgError>;
