use crate::domain::jobs::{Job, JobPayload, TransitionError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    /// `create` with an id that already has a record (caller error)
    DuplicateJob(String),
    UnknownJob(String),
    IllegalTransition(TransitionError),
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateJob(id) => write!(f, "job {} already exists", id),
            StoreError::UnknownJob(id) => write!(f, "job {} not found", id),
            StoreError::IllegalTransition(e) => write!(f, "illegal transition: {}", e),
            StoreError::Io(e) => write!(f, "io error: {}", e),
            StoreError::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IllegalTransition(e) => Some(e),
            StoreError::Io(e) => Some(e),
            StoreError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransitionError> for StoreError {
    fn from(err: TransitionError) -> Self {
        StoreError::IllegalTransition(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

/// Durable record of job identity, status, progress, inputs, outputs and
/// errors; the state-machine authority. One worker owns a job end-to-end,
/// and the store serialises concurrent access to the same id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` record at progress 0. Fails only on duplicate id.
    async fn create(&self, id: &str, payload: JobPayload) -> Result<Job, StoreError>;

    /// Record forward progress. First call flips `pending` to `processing`;
    /// smaller values are clamped so progress never regresses; illegal on a
    /// terminal job.
    async fn update_progress(
        &self,
        id: &str,
        progress: u8,
        message: Option<&str>,
    ) -> Result<Job, StoreError>;

    /// Verify every named output exists on disk, then transition to
    /// `completed`. If any path is missing, the call is redirected to
    /// `fail` with an error naming the path, so a "completed" job can never
    /// reference a dangling artifact. Returns the resulting job either way.
    async fn complete(&self, id: &str, outputs: HashMap<String, PathBuf>)
        -> Result<Job, StoreError>;

    /// Transition to `failed`. Idempotent on a failed job; rejected on a
    /// completed one.
    async fn fail(&self, id: &str, error: &str) -> Result<Job, StoreError>;

    /// Consistent snapshot of the record, `None` if unknown.
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Most recently updated jobs first.
    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError>;
}
