//! Job repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use keeper_models::{Job, JobId, JobStatus};

use crate::error::{RecordsError, RecordsResult};
use crate::store::RecordStore;

fn row_to_job(row: &SqliteRow) -> RecordsResult<Job> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: JobId::from_string(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        status: status
            .parse::<JobStatus>()
            .map_err(RecordsError::invalid_data)?,
        total_files: row.try_get("total_files")?,
        processed_files: row.try_get("processed_files")?,
        error: row.try_get("error")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
    })
}

impl RecordStore {
    /// Insert a new job.
    pub async fn create_job(&self, job: &Job) -> RecordsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, status, total_files, processed_files, error,
                              created_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(job.total_files)
        .bind(job.processed_files)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(self.pool())
        .await?;

        info!("Created job {}", job.id);
        Ok(())
    }

    /// Fetch a job by ID.
    pub async fn get_job(&self, job_id: &JobId) -> RecordsResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Fetch a job or fail with `NotFound`.
    pub async fn require_job(&self, job_id: &JobId) -> RecordsResult<Job> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| RecordsError::not_found(format!("job {job_id}")))
    }

    /// Page over jobs, newest first.
    pub async fn list_jobs(&self, limit: i64, offset: i64) -> RecordsResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Total number of jobs.
    pub async fn count_jobs(&self) -> RecordsResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Advance a job to the given status and reset the stage progress
    /// counter. Sets `completed_at` when entering `completed`.
    pub async fn advance_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
    ) -> RecordsResult<()> {
        let now = Utc::now();
        let completed_at = (status == JobStatus::Completed).then_some(now);

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, processed_files = 0, updated_at = ?,
                completed_at = COALESCE(?, completed_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Mark a job failed with a user-visible message.
    pub async fn fail_job(&self, job_id: &JobId, error: impl AsRef<str>) -> RecordsResult<()> {
        sqlx::query("UPDATE jobs SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Failed.as_str())
            .bind(error.as_ref())
            .bind(Utc::now())
            .bind(job_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record the number of media files discovered in the archive.
    pub async fn set_job_totals(&self, job_id: &JobId, total_files: i64) -> RecordsResult<()> {
        sqlx::query("UPDATE jobs SET total_files = ?, updated_at = ? WHERE id = ?")
            .bind(total_files)
            .bind(Utc::now())
            .bind(job_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Overwrite the stage progress counter.
    pub async fn set_job_progress(&self, job_id: &JobId, processed: i64) -> RecordsResult<()> {
        sqlx::query("UPDATE jobs SET processed_files = ?, updated_at = ? WHERE id = ?")
            .bind(processed)
            .bind(Utc::now())
            .bind(job_id.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Atomically bump the stage progress counter; returns the new value.
    pub async fn increment_job_progress(&self, job_id: &JobId) -> RecordsResult<i64> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET processed_files = processed_files + 1, updated_at = ?
            WHERE id = ?
            RETURNING processed_files
            "#,
        )
        .bind(Utc::now())
        .bind(job_id.as_str())
        .fetch_one(self.pool())
        .await?;

        Ok(row.try_get("processed_files")?)
    }

    /// Rename a job.
    pub async fn rename_job(&self, job_id: &JobId, name: &str) -> RecordsResult<()> {
        let result = sqlx::query("UPDATE jobs SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now())
            .bind(job_id.as_str())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordsError::not_found(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Delete a job; descendants cascade. Returns false when the job did
    /// not exist.
    pub async fn delete_job(&self, job_id: &JobId) -> RecordsResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.as_str())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Jobs whose status is neither terminal nor finished: the boot-time
    /// recovery set.
    pub async fn recoverable_jobs(&self) -> RecordsResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status NOT IN (?, ?) ORDER BY created_at ASC",
        )
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(Some("holiday".to_string()));
        store.create_job(&job).await.unwrap();

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.name.as_deref(), Some("holiday"));
        assert_eq!(loaded.status, JobStatus::Uploading);
    }

    #[tokio::test]
    async fn test_advance_resets_progress() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        store.set_job_totals(&job.id, 5).await.unwrap();
        store.set_job_progress(&job.id, 5).await.unwrap();
        store
            .advance_job_status(&job.id, JobStatus::Labeling)
            .await
            .unwrap();

        let loaded = store.require_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Labeling);
        assert_eq!(loaded.processed_files, 0);
        assert_eq!(loaded.total_files, 5);
    }

    #[tokio::test]
    async fn test_completed_sets_timestamp() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        store
            .advance_job_status(&job.id, JobStatus::Completed)
            .await
            .unwrap();
        let loaded = store.require_job(&job.id).await.unwrap();
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_job_persists_message() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        store.fail_job(&job.id, "no media files found in archive").await.unwrap();
        let loaded = store.require_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("no media files found in archive"));
    }

    #[tokio::test]
    async fn test_recoverable_excludes_terminal() {
        let store = RecordStore::in_memory().await.unwrap();
        let active = Job::new(None);
        let done = Job::new(None);
        let dead = Job::new(None);
        for j in [&active, &done, &dead] {
            store.create_job(j).await.unwrap();
        }
        store
            .advance_job_status(&done.id, JobStatus::Completed)
            .await
            .unwrap();
        store.fail_job(&dead.id, "boom").await.unwrap();

        let recoverable = store.recoverable_jobs().await.unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, active.id);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let store = RecordStore::in_memory().await.unwrap();
        let job = Job::new(None);
        store.create_job(&job).await.unwrap();

        assert!(store.delete_job(&job.id).await.unwrap());
        assert!(!store.delete_job(&job.id).await.unwrap());
    }
}
