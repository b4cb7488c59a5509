use crate::domain::overlay::{OverlayStyle, WordMode};
use crate::domain::srt::SubtitleFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Transcribe,
    Composite,
    Split,
    Join,
    MuxAudio,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Transcribe => write!(f, "transcribe"),
            JobKind::Composite => write!(f, "composite"),
            JobKind::Split => write!(f, "split"),
            JobKind::Join => write!(f, "join"),
            JobKind::MuxAudio => write!(f, "mux-audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states are final: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Kind-specific input payload. A closed set of named fields per kind; the
/// tag matches `JobKind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    Transcribe {
        source: PathBuf,
        language: String,
        /// Signed seconds applied uniformly to all emitted timestamps
        #[serde(default)]
        timing_offset: f64,
        #[serde(default)]
        format: SubtitleFormat,
    },
    Composite {
        source: PathBuf,
        language: String,
        #[serde(default)]
        timing_offset: f64,
        #[serde(default)]
        word_mode: WordMode,
        #[serde(default)]
        style: OverlayStyle,
    },
    Split {
        source: PathBuf,
        start: f64,
        end: f64,
    },
    Join {
        /// Inputs must share codec parameters; the join is a stream copy
        sources: Vec<PathBuf>,
    },
    MuxAudio {
        source: PathBuf,
        audio: PathBuf,
        #[serde(default = "default_volume")]
        volume: f32,
        #[serde(default)]
        loop_audio: bool,
    },
}

fn default_volume() -> f32 {
    1.0
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Transcribe { .. } => JobKind::Transcribe,
            JobPayload::Composite { .. } => JobKind::Composite,
            JobPayload::Split { .. } => JobKind::Split,
            JobPayload::Join { .. } => JobKind::Join,
            JobPayload::MuxAudio { .. } => JobKind::MuxAudio,
        }
    }
}

/// One durable record per job id. Owned exclusively by the job store and
/// mutated only through its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0-100, never decreases while the job is live
    pub progress: u8,
    pub status_message: String,
    pub payload: JobPayload,
    /// Named output artifacts, present once the job completes
    pub outputs: HashMap<String, PathBuf>,
    /// Present iff status is `failed`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rejected state-machine transitions. Wrapped by the store's error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Attempted to update a job already in a terminal state
    Terminal(JobStatus),
    /// `fail` on a completed job; nothing leaves `completed`
    AlreadyCompleted,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Terminal(status) => {
                write!(f, "job is terminal ({:?}) and cannot be updated", status)
            }
            TransitionError::AlreadyCompleted => {
                write!(f, "job already completed; completed jobs cannot fail")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl Job {
    pub fn new(id: String, payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: payload.kind(),
            status: JobStatus::Pending,
            progress: 0,
            status_message: "job created".to_string(),
            payload,
            outputs: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record forward progress. Legal only while the job is live; the first
    /// call flips `pending` to `processing`. A smaller progress value is
    /// clamped so observed progress never regresses.
    pub fn apply_progress(
        &mut self,
        progress: u8,
        message: Option<&str>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.status = JobStatus::Processing;
        self.progress = self.progress.max(progress.min(100));
        if let Some(message) = message {
            self.status_message = message.to_string();
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `completed`. Callers (the store) must have verified
    /// that every output path exists before invoking this.
    pub fn apply_completed(
        &mut self,
        outputs: HashMap<String, PathBuf>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.status_message = "completed".to_string();
        self.outputs = outputs;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `failed`. Idempotent on an already-failed job (the
    /// error is overwritten); rejected on a completed one. Progress stays
    /// frozen at its last value.
    pub fn apply_failed(&mut self, error: &str) -> Result<(), TransitionError> {
        if self.status == JobStatus::Completed {
            return Err(TransitionError::AlreadyCompleted);
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.status_message = "failed".to_string();
        self.updated_at = Utc::now();
        Ok(())
    }
}
