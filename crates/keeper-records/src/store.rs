//! Connection handling and schema setup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::RecordsResult;

/// Handle to the record store. Cheap to clone; all repositories are
/// `impl RecordStore` blocks in the sibling modules.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Connect using a database URL and create missing tables.
    pub async fn connect(database_url: &str) -> RecordsResult<Self> {
        info!("Connecting to {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = RecordStore { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub async fn from_env() -> RecordsResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://keeper.db?mode=rwc".to_string());
        Self::connect(&url).await
    }

    /// An isolated in-memory store, used by tests.
    pub async fn in_memory() -> RecordsResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = RecordStore { pool };
        store.create_tables().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Verify the store answers queries.
    pub async fn check_connectivity(&self) -> RecordsResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create all necessary tables.
    async fn create_tables(&self) -> RecordsResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT,
                status TEXT NOT NULL,
                total_files INTEGER NOT NULL DEFAULT 0,
                processed_files INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                name TEXT NOT NULL,
                centroid TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS media_files (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                original_path TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                blob_url TEXT NOT NULL,
                media_type TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                label TEXT,
                rating_score REAL NOT NULL DEFAULT 1000,
                is_top_pick INTEGER NOT NULL DEFAULT 0,
                enhanced_blob_key TEXT,
                enhanced_blob_url TEXT,
                bucket_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs (id) ON DELETE CASCADE,
                FOREIGN KEY (bucket_id) REFERENCES buckets (id) ON DELETE SET NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournament_matches (
                id TEXT PRIMARY KEY,
                bucket_id TEXT NOT NULL,
                media_type TEXT NOT NULL,
                round INTEGER NOT NULL,
                media1_id TEXT NOT NULL,
                media2_id TEXT NOT NULL,
                winner_id TEXT NOT NULL,
                reasoning TEXT,
                change1 REAL NOT NULL,
                change2 REAL NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (bucket_id) REFERENCES buckets (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_media_files_job ON media_files (job_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_media_files_bucket ON media_files (bucket_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_buckets_job ON buckets (job_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_matches_bucket ON tournament_matches (bucket_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
