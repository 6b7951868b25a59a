// Streaming buffers
//
// - `ring`: fixed-capacity overwrite-oldest rings with metrics
// - `pool`: per-channel display/prediction/recording buffers and ingestion

pub mod pool;
pub mod ring;

pub use pool::{
    ChannelBufferPool, ChannelHandle, ChannelMetrics, Ingest, LabeledSample, PredictionSnapshot,
    RecordingState, DEFAULT_LABEL,
};
pub use ring::{RingBuffer, RingMetrics};
