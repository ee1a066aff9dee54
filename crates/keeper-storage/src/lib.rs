//! S3-compatible blob store adapter.
//!
//! The pipeline talks to storage through the [`BlobStore`] trait; the
//! production implementation is [`BlobClient`], an aws-sdk-s3 client with
//! path-style addressing suitable for R2-style endpoints.

pub mod client;
pub mod error;
pub mod keys;

use async_trait::async_trait;

pub use client::{BlobClient, BlobConfig};
pub use error::{StorageError, StorageResult};
pub use keys::{enhanced_key, job_prefix, original_key};

/// Blob put/get/delete/presign interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Fetch the bytes stored under a key.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete a single object.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Delete every object under a prefix; returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;

    /// Resolve a client-usable URL for a key (public base or presigned).
    async fn url_for(&self, key: &str) -> StorageResult<String>;
}
