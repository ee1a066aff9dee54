//! Tournament match records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BucketId, MediaId, MediaType};

/// One pairwise quality judgment inside a bucket tournament.
///
/// Immutable once written; `change1`/`change2` are the exact Elo deltas
/// that were applied to the two members' in-memory ratings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TournamentMatch {
    /// Unique match ID
    pub id: String,

    /// Bucket the tournament ran in
    pub bucket_id: BucketId,

    /// Media type of both contestants
    pub media_type: MediaType,

    /// Tournament round (full round-robin runs a single round)
    pub round: i64,

    /// First contestant
    pub media1_id: MediaId,

    /// Second contestant
    pub media2_id: MediaId,

    /// Winner; always one of the two contestants
    pub winner_id: MediaId,

    /// Model-provided explanation for the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Rating delta applied to `media1_id`
    pub change1: f64,

    /// Rating delta applied to `media2_id`
    pub change2: f64,

    /// Completion timestamp
    pub created_at: DateTime<Utc>,
}

impl TournamentMatch {
    /// Record a completed match.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket_id: BucketId,
        media_type: MediaType,
        round: i64,
        media1_id: MediaId,
        media2_id: MediaId,
        winner_id: MediaId,
        reasoning: Option<String>,
        change1: f64,
        change2: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bucket_id,
            media_type,
            round,
            media1_id,
            media2_id,
            winner_id,
            reasoning,
            change1,
            change2,
            created_at: Utc::now(),
        }
    }
}
