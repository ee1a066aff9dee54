//! Job entity and status machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline position of a job.
///
/// Transitions only move forward along the stage order; `Failed` is
/// reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Receiving chunks over the upload session
    Uploading,
    /// Expanding the archive into media files
    Extracting,
    /// Describing each media file
    Labeling,
    /// Incremental same-take grouping (Phase A)
    Clustering,
    /// Representative merge sweep (Phase B)
    Merging,
    /// Per-bucket quality tournaments
    Ranking,
    /// Enhancing top picks
    Enhancing,
    /// Pipeline finished
    Completed,
    /// Pipeline aborted with a persisted error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Extracting => "extracting",
            JobStatus::Labeling => "labeling",
            JobStatus::Clustering => "clustering",
            JobStatus::Merging => "merging",
            JobStatus::Ranking => "ranking",
            JobStatus::Enhancing => "enhancing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never re-enqueued and never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along the forward stage order, used to assert monotone
    /// transitions. `Failed` has no position.
    pub fn stage_index(&self) -> Option<u8> {
        match self {
            JobStatus::Uploading => Some(0),
            JobStatus::Extracting => Some(1),
            JobStatus::Labeling => Some(2),
            JobStatus::Clustering => Some(3),
            JobStatus::Merging => Some(4),
            JobStatus::Ranking => Some(5),
            JobStatus::Enhancing => Some(6),
            JobStatus::Completed => Some(7),
            JobStatus::Failed => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(JobStatus::Uploading),
            "extracting" => Ok(JobStatus::Extracting),
            "labeling" => Ok(JobStatus::Labeling),
            "clustering" => Ok(JobStatus::Clustering),
            "merging" => Ok(JobStatus::Merging),
            "ranking" => Ok(JobStatus::Ranking),
            "enhancing" => Ok(JobStatus::Enhancing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One end-to-end processing run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Optional user-supplied display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Current pipeline status
    pub status: JobStatus,

    /// Media files discovered in the archive
    pub total_files: i64,

    /// Units of work finished in the current stage
    pub processed_files: i64,

    /// Failure message (set only when status is `failed`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `uploading`.
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name,
            status: JobStatus::Uploading,
            total_files: 0,
            processed_files: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
