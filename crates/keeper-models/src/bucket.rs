//! Same-take bucket entity.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::JobId;

/// Unique identifier for a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BucketId(pub String);

impl BucketId {
    /// Generate a new random bucket ID.
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

impl Default for BucketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BucketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A group of media files judged to be the same take.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Unique bucket ID
    pub id: BucketId,

    /// Owning job
    pub job_id: JobId,

    /// Short model-generated name, or `Bucket N` fallback
    pub name: String,

    /// Reserved for a future embedding centroid; never populated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    /// Create a new bucket for a job.
    pub fn new(job_id: JobId, name: impl Into<String>) -> Self {
        Self {
            id: BucketId::new(),
            job_id,
            name: name.into(),
            centroid: None,
            created_at: Utc::now(),
        }
    }
}
