// Job bookkeeping types for the worker pool

use crate::error::{EmgError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Predict,
    SaveRecording,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Training => write!(f, "training"),
            JobKind::Predict => write!(f, "predict"),
            JobKind::SaveRecording => write!(f, "save_recording"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobInfo {
    pub fn new(name: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, JobState::Pending | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}

/// Awaitable result of a submitted job
///
/// Dropping the handle does not cancel the job; its result is discarded.
pub struct JobHandle<T> {
    pub id: Uuid,
    pub kind: JobKind,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(id: Uuid, kind: JobKind, rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { id, kind, rx }
    }

    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| EmgError::JobDropped)?
    }

    /// Wait at most `timeout`; the job keeps running if it overruns
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EmgError::JobDropped),
            Err(_) => Err(EmgError::JobTimeout(timeout.as_millis() as u64)),
        }
    }

    /// For callers outside the async runtime
    pub fn blocking_wait(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| EmgError::JobDropped)?
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
