//! The model adapter seam.

use async_trait::async_trait;

use keeper_models::MediaType;

use crate::error::ModelResult;
use crate::types::{MediaPayload, QualityVerdict};

/// The four pipeline RPCs plus bucket naming.
///
/// The pipeline only ever sees this trait; the production implementation
/// is [`crate::GeminiClient`], tests script their own.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// One-sentence description of a media file.
    async fn describe(&self, media: &MediaPayload) -> ModelResult<String>;

    /// Whether two images are takes of the same scene.
    async fn same_take(&self, a: &MediaPayload, b: &MediaPayload) -> ModelResult<bool>;

    /// Pairwise quality judgment between two members of a bucket.
    async fn compare_quality(
        &self,
        a: &MediaPayload,
        b: &MediaPayload,
        media_type: MediaType,
    ) -> ModelResult<QualityVerdict>;

    /// Enhanced rendering of an image; `None` when the model declines.
    async fn enhance(&self, media: &MediaPayload) -> ModelResult<Option<MediaPayload>>;

    /// Short display name for a group of same-take labels.
    async fn name_bucket(&self, labels: &[String]) -> ModelResult<String>;
}
