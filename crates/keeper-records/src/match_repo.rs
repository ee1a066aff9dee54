//! Tournament match repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use keeper_models::{BucketId, JobId, MediaId, MediaType, TournamentMatch};

use crate::error::{RecordsError, RecordsResult};
use crate::store::RecordStore;

fn row_to_match(row: &SqliteRow) -> RecordsResult<TournamentMatch> {
    let media_type: String = row.try_get("media_type")?;
    Ok(TournamentMatch {
        id: row.try_get("id")?,
        bucket_id: BucketId::from_string(row.try_get::<String, _>("bucket_id")?),
        media_type: media_type
            .parse::<MediaType>()
            .map_err(RecordsError::invalid_data)?,
        round: row.try_get("round")?,
        media1_id: MediaId::from_string(row.try_get::<String, _>("media1_id")?),
        media2_id: MediaId::from_string(row.try_get::<String, _>("media2_id")?),
        winner_id: MediaId::from_string(row.try_get::<String, _>("winner_id")?),
        reasoning: row.try_get("reasoning")?,
        change1: row.try_get("change1")?,
        change2: row.try_get("change2")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

impl RecordStore {
    /// Record a completed match. Matches are immutable once written.
    pub async fn create_match(&self, m: &TournamentMatch) -> RecordsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tournament_matches (id, bucket_id, media_type, round, media1_id,
                                            media2_id, winner_id, reasoning, change1, change2,
                                            created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&m.id)
        .bind(m.bucket_id.as_str())
        .bind(m.media_type.as_str())
        .bind(m.round)
        .bind(m.media1_id.as_str())
        .bind(m.media2_id.as_str())
        .bind(m.winner_id.as_str())
        .bind(&m.reasoning)
        .bind(m.change1)
        .bind(m.change2)
        .bind(m.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Matches of one bucket in completion order.
    pub async fn list_matches(&self, bucket_id: &BucketId) -> RecordsResult<Vec<TournamentMatch>> {
        let rows = sqlx::query(
            "SELECT * FROM tournament_matches WHERE bucket_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(bucket_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_match).collect()
    }

    /// Number of matches recorded across a whole job.
    pub async fn count_matches_for_job(&self, job_id: &JobId) -> RecordsResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM tournament_matches m
            JOIN buckets b ON b.id = m.bucket_id
            WHERE b.job_id = ?
            "#,
        )
        .bind(job_id.as_str())
        .fetch_one(self.pool())
        .await?;

        Ok(row.try_get("n")?)
    }
}
