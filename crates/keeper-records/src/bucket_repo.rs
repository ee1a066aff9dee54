//! Bucket repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use keeper_models::{Bucket, BucketId, JobId, MediaId};

use crate::error::RecordsResult;
use crate::store::RecordStore;

fn row_to_bucket(row: &SqliteRow) -> RecordsResult<Bucket> {
    Ok(Bucket {
        id: BucketId::from_string(row.try_get::<String, _>("id")?),
        job_id: JobId::from_string(row.try_get::<String, _>("job_id")?),
        name: row.try_get("name")?,
        centroid: row.try_get("centroid")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

impl RecordStore {
    /// Insert a bucket.
    pub async fn create_bucket(&self, bucket: &Bucket) -> RecordsResult<()> {
        sqlx::query(
            "INSERT INTO buckets (id, job_id, name, centroid, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bucket.id.as_str())
        .bind(bucket.job_id.as_str())
        .bind(&bucket.name)
        .bind(&bucket.centroid)
        .bind(bucket.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// All buckets of a job, oldest first.
    pub async fn list_buckets(&self, job_id: &JobId) -> RecordsResult<Vec<Bucket>> {
        let rows = sqlx::query(
            "SELECT * FROM buckets WHERE job_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_bucket).collect()
    }

    /// Write buckets and their member assignments in one transaction, so
    /// a resumed job never observes buckets without members.
    pub async fn create_buckets_with_members(
        &self,
        buckets: &[(Bucket, Vec<MediaId>)],
    ) -> RecordsResult<()> {
        let mut tx = self.pool().begin().await?;
        for (bucket, members) in buckets {
            sqlx::query(
                "INSERT INTO buckets (id, job_id, name, centroid, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(bucket.id.as_str())
            .bind(bucket.job_id.as_str())
            .bind(&bucket.name)
            .bind(&bucket.centroid)
            .bind(bucket.created_at)
            .execute(&mut *tx)
            .await?;

            for member in members {
                sqlx::query("UPDATE media_files SET bucket_id = ? WHERE id = ?")
                    .bind(bucket.id.as_str())
                    .bind(member.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Collapse buckets after a merge sweep: move the listed members and
    /// drop the absorbed bucket rows in one transaction.
    pub async fn merge_buckets(
        &self,
        moves: &[(MediaId, BucketId)],
        absorbed: &[BucketId],
    ) -> RecordsResult<()> {
        let mut tx = self.pool().begin().await?;
        for (media_id, bucket_id) in moves {
            sqlx::query("UPDATE media_files SET bucket_id = ? WHERE id = ?")
                .bind(bucket_id.as_str())
                .bind(media_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        for bucket_id in absorbed {
            sqlx::query("DELETE FROM buckets WHERE id = ?")
                .bind(bucket_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_models::Job;

    #[tokio::test]
    async fn test_bucket_round_trip() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        let bucket = Bucket::new(job.id.clone(), "Sunset over pier");
        store.create_bucket(&bucket).await.unwrap();

        let buckets = store.list_buckets(&job.id).await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "Sunset over pier");
        assert!(buckets[0].centroid.is_none());
    }

    #[tokio::test]
    async fn test_transactional_create_and_merge() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        let file = keeper_models::MediaFile::new(
            job.id.clone(),
            "a.jpg",
            "a.jpg",
            "jobs/x/original/a.jpg",
            "https://blob/a.jpg",
            keeper_models::MediaType::Image,
            "image/jpeg",
            9,
        );
        store.create_media_file(&file).await.unwrap();

        let keeper = Bucket::new(job.id.clone(), "Keeper");
        let absorbed = Bucket::new(job.id.clone(), "Duplicate");
        store
            .create_buckets_with_members(&[
                (keeper.clone(), vec![]),
                (absorbed.clone(), vec![file.id.clone()]),
            ])
            .await
            .unwrap();
        assert_eq!(store.list_buckets(&job.id).await.unwrap().len(), 2);

        store
            .merge_buckets(&[(file.id.clone(), keeper.id.clone())], &[absorbed.id.clone()])
            .await
            .unwrap();

        let buckets = store.list_buckets(&job.id).await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "Keeper");
        let members = store.media_files_in_bucket(&keeper.id).await.unwrap();
        assert_eq!(members.len(), 1);
    }
}
