//! Labeling stage: one `describe` call per media file.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use keeper_models::JobStatus;
use keeper_vision::MediaPayload;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stages::drain_workers;

/// Label every media file that does not have a description yet. A label
/// that fails permanently fails the stage: every file must carry a label
/// before the job leaves `labeling`.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    let files = ctx.records().list_media_files(&ctx.job_id).await?;
    let total = files.len() as u64;
    let pending: Vec<_> = files.into_iter().filter(|f| f.label.is_none()).collect();

    let already_labeled = total - pending.len() as u64;
    ctx.records()
        .set_job_progress(&ctx.job_id, already_labeled as i64)
        .await?;
    ctx.report_stage(JobStatus::Labeling, already_labeled, total, None);

    if pending.is_empty() {
        info!("Job {}: all {} files already labeled", ctx.job_id, total);
        return Ok(());
    }

    let semaphore = Arc::new(Semaphore::new(ctx.config().label_concurrency));
    let mut tasks: JoinSet<PipelineResult<()>> = JoinSet::new();

    for file in pending {
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("label pool closed"))?;
            ctx.check_cancelled()?;

            let bytes = ctx.blobs().get_bytes(&file.blob_key).await?;
            ctx.check_cancelled()?;

            let payload = MediaPayload::new(bytes, file.mime_type.clone());
            let label = ctx.model().describe(&payload).await.map_err(|e| {
                PipelineError::job_failed(format!("failed to label {}: {e}", file.filename))
            })?;

            ctx.records().set_media_label(&file.id, &label).await?;
            ctx.bump_progress(JobStatus::Labeling, total).await?;
            Ok(())
        });
    }

    drain_workers(ctx, tasks).await
}
