//! Enhancement stage: model-driven re-rendering of image top picks.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use keeper_models::{JobStatus, MediaType};
use keeper_storage::enhanced_key;
use keeper_vision::MediaPayload;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stages::drain_workers;

/// Enhance every image top pick. An enhancement that fails or that the
/// model declines leaves the enhanced fields unset and the stage moves on.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    let picks = ctx
        .records()
        .top_picks(&ctx.job_id, Some(MediaType::Image))
        .await?;
    let pending: Vec<_> = picks
        .into_iter()
        .filter(|p| p.enhanced_blob_key.is_none())
        .collect();

    if pending.is_empty() {
        info!("Job {}: nothing to enhance", ctx.job_id);
        return Ok(());
    }

    let total = pending.len() as u64;
    let semaphore = Arc::new(Semaphore::new(ctx.config().enhance_concurrency));
    let mut tasks: JoinSet<PipelineResult<()>> = JoinSet::new();

    for pick in pending {
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("enhance pool closed"))?;
            ctx.check_cancelled()?;

            let result: PipelineResult<Option<MediaPayload>> = async {
                let bytes = ctx.blobs().get_bytes(&pick.blob_key).await?;
                let payload = MediaPayload::new(bytes, pick.mime_type.clone());
                Ok(ctx.model().enhance(&payload).await?)
            }
            .await;

            match result {
                Ok(Some(enhanced)) => {
                    let key = enhanced_key(&ctx.job_id, &pick.filename);
                    ctx.blobs()
                        .put_bytes(&key, enhanced.bytes, &enhanced.mime_type)
                        .await?;
                    let url = ctx.blobs().url_for(&key).await?;
                    ctx.records().set_media_enhanced(&pick.id, &key, &url).await?;
                }
                Ok(None) => {
                    info!("Model declined to enhance {}", pick.filename);
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!("Enhancement of {} skipped: {}", pick.filename, e);
                }
            }

            ctx.bump_progress(JobStatus::Enhancing, total).await?;
            Ok(())
        });
    }

    drain_workers(ctx, tasks).await
}
