//! Media file repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use keeper_models::{BucketId, JobId, MediaFile, MediaId, MediaType};

use crate::error::{RecordsError, RecordsResult};
use crate::store::RecordStore;

fn row_to_media(row: &SqliteRow) -> RecordsResult<MediaFile> {
    let media_type: String = row.try_get("media_type")?;
    Ok(MediaFile {
        id: MediaId::from_string(row.try_get::<String, _>("id")?),
        job_id: JobId::from_string(row.try_get::<String, _>("job_id")?),
        filename: row.try_get("filename")?,
        original_path: row.try_get("original_path")?,
        blob_key: row.try_get("blob_key")?,
        blob_url: row.try_get("blob_url")?,
        media_type: media_type
            .parse::<MediaType>()
            .map_err(RecordsError::invalid_data)?,
        mime_type: row.try_get("mime_type")?,
        size_bytes: row.try_get("size_bytes")?,
        label: row.try_get("label")?,
        rating_score: row.try_get("rating_score")?,
        is_top_pick: row.try_get("is_top_pick")?,
        enhanced_blob_key: row.try_get("enhanced_blob_key")?,
        enhanced_blob_url: row.try_get("enhanced_blob_url")?,
        bucket_id: row
            .try_get::<Option<String>, _>("bucket_id")?
            .map(BucketId::from_string),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

impl RecordStore {
    /// Insert a media file record.
    pub async fn create_media_file(&self, file: &MediaFile) -> RecordsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO media_files (id, job_id, filename, original_path, blob_key, blob_url,
                                     media_type, mime_type, size_bytes, label, rating_score,
                                     is_top_pick, enhanced_blob_key, enhanced_blob_url,
                                     bucket_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.as_str())
        .bind(file.job_id.as_str())
        .bind(&file.filename)
        .bind(&file.original_path)
        .bind(&file.blob_key)
        .bind(&file.blob_url)
        .bind(file.media_type.as_str())
        .bind(&file.mime_type)
        .bind(file.size_bytes)
        .bind(&file.label)
        .bind(file.rating_score)
        .bind(file.is_top_pick)
        .bind(&file.enhanced_blob_key)
        .bind(&file.enhanced_blob_url)
        .bind(file.bucket_id.as_ref().map(|b| b.as_str().to_string()))
        .bind(file.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetch one media file.
    pub async fn get_media_file(&self, media_id: &MediaId) -> RecordsResult<Option<MediaFile>> {
        let row = sqlx::query("SELECT * FROM media_files WHERE id = ?")
            .bind(media_id.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_media).transpose()
    }

    /// All media files of a job, in insertion (archive) order.
    pub async fn list_media_files(&self, job_id: &JobId) -> RecordsResult<Vec<MediaFile>> {
        let rows = sqlx::query(
            "SELECT * FROM media_files WHERE job_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_media).collect()
    }

    /// Media files of a job still lacking a bucket.
    pub async fn unclustered_media_files(&self, job_id: &JobId) -> RecordsResult<Vec<MediaFile>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM media_files
            WHERE job_id = ? AND bucket_id IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_media).collect()
    }

    /// Members of a bucket, best rating first.
    pub async fn media_files_in_bucket(
        &self,
        bucket_id: &BucketId,
    ) -> RecordsResult<Vec<MediaFile>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM media_files
            WHERE bucket_id = ?
            ORDER BY rating_score DESC, id ASC
            "#,
        )
        .bind(bucket_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_media).collect()
    }

    /// Store the labeler's description.
    pub async fn set_media_label(&self, media_id: &MediaId, label: &str) -> RecordsResult<()> {
        sqlx::query("UPDATE media_files SET label = ? WHERE id = ?")
            .bind(label)
            .bind(media_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist final ratings and top-pick flags for a bucket in one
    /// transaction.
    pub async fn set_ratings_and_picks(
        &self,
        ratings: &[(MediaId, f64)],
        picks: &[MediaId],
    ) -> RecordsResult<()> {
        let mut tx = self.pool().begin().await?;
        for (media_id, rating) in ratings {
            sqlx::query("UPDATE media_files SET rating_score = ? WHERE id = ?")
                .bind(rating)
                .bind(media_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        for media_id in picks {
            sqlx::query("UPDATE media_files SET is_top_pick = 1 WHERE id = ?")
                .bind(media_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persist one member's rating without touching pick flags.
    pub async fn set_media_rating(&self, media_id: &MediaId, rating: f64) -> RecordsResult<()> {
        sqlx::query("UPDATE media_files SET rating_score = ? WHERE id = ?")
            .bind(rating)
            .bind(media_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Store the enhanced rendering location.
    pub async fn set_media_enhanced(
        &self,
        media_id: &MediaId,
        blob_key: &str,
        blob_url: &str,
    ) -> RecordsResult<()> {
        sqlx::query(
            "UPDATE media_files SET enhanced_blob_key = ?, enhanced_blob_url = ? WHERE id = ?",
        )
        .bind(blob_key)
        .bind(blob_url)
        .bind(media_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Top picks of a job, optionally restricted by media type.
    pub async fn top_picks(
        &self,
        job_id: &JobId,
        media_type: Option<MediaType>,
    ) -> RecordsResult<Vec<MediaFile>> {
        let rows = match media_type {
            Some(mt) => {
                sqlx::query(
                    r#"
                    SELECT * FROM media_files
                    WHERE job_id = ? AND is_top_pick = 1 AND media_type = ?
                    ORDER BY rating_score DESC, id ASC
                    "#,
                )
                .bind(job_id.as_str())
                .bind(mt.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM media_files
                    WHERE job_id = ? AND is_top_pick = 1
                    ORDER BY rating_score DESC, id ASC
                    "#,
                )
                .bind(job_id.as_str())
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.iter().map(row_to_media).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_models::{Bucket, Job};

    async fn seeded_store() -> (RecordStore, Job) {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();
        (store, job)
    }

    fn sample_file(job_id: &JobId, name: &str) -> MediaFile {
        MediaFile::new(
            job_id.clone(),
            name,
            format!("photos/{name}"),
            format!("jobs/{job_id}/original/{name}"),
            format!("https://blob/{name}"),
            MediaType::Image,
            "image/jpeg",
            100,
        )
    }

    #[tokio::test]
    async fn test_media_round_trip() {
        let (store, job) = seeded_store().await;
        let file = sample_file(&job.id, "a.jpg");
        store.create_media_file(&file).await.unwrap();

        let loaded = store.get_media_file(&file.id).await.unwrap().unwrap();
        assert_eq!(loaded.filename, "a.jpg");
        assert_eq!(loaded.media_type, MediaType::Image);
        assert_eq!(loaded.rating_score, 1000.0);
        assert!(loaded.bucket_id.is_none());
    }

    #[tokio::test]
    async fn test_bucket_assignment_batch() {
        let (store, job) = seeded_store().await;
        let a = sample_file(&job.id, "a.jpg");
        let b = sample_file(&job.id, "b.jpg");
        store.create_media_file(&a).await.unwrap();
        store.create_media_file(&b).await.unwrap();

        let bucket = Bucket::new(job.id.clone(), "Bucket 1");
        store
            .create_buckets_with_members(&[(bucket.clone(), vec![a.id.clone(), b.id.clone()])])
            .await
            .unwrap();

        assert!(store.unclustered_media_files(&job.id).await.unwrap().is_empty());
        assert_eq!(
            store.media_files_in_bucket(&bucket.id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_ratings_and_picks_ordering() {
        let (store, job) = seeded_store().await;
        let a = sample_file(&job.id, "a.jpg");
        let b = sample_file(&job.id, "b.jpg");
        store.create_media_file(&a).await.unwrap();
        store.create_media_file(&b).await.unwrap();

        let bucket = Bucket::new(job.id.clone(), "Bucket 1");
        store
            .create_buckets_with_members(&[(bucket.clone(), vec![a.id.clone(), b.id.clone()])])
            .await
            .unwrap();

        store
            .set_ratings_and_picks(
                &[(a.id.clone(), 987.0), (b.id.clone(), 1013.0)],
                &[b.id.clone()],
            )
            .await
            .unwrap();

        let members = store.media_files_in_bucket(&bucket.id).await.unwrap();
        assert_eq!(members[0].id, b.id);
        assert!(members[0].is_top_pick);
        assert!(!members[1].is_top_pick);

        let picks = store.top_picks(&job.id, Some(MediaType::Image)).await.unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].id, b.id);
    }

    #[tokio::test]
    async fn test_job_delete_cascades_to_media() {
        let (store, job) = seeded_store().await;
        let file = sample_file(&job.id, "a.jpg");
        store.create_media_file(&file).await.unwrap();

        store.delete_job(&job.id).await.unwrap();
        assert!(store.get_media_file(&file.id).await.unwrap().is_none());
    }
}
