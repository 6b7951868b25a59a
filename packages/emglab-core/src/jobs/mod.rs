pub mod pool;
pub mod types;

pub use pool::{JobRegistry, WorkerPool};
pub use types::{JobHandle, JobInfo, JobKind, JobState};
