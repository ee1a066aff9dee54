//! Clustering stage, Phase A: incremental same-take grouping.
//!
//! Images are processed in archive order. Each new image races a
//! `same_take` probe against every current bucket representative; the
//! first bucket to answer "same" wins and the remaining probes are
//! cancelled. Videos all land in a single per-job bucket.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use keeper_models::{Bucket, JobStatus, MediaFile, MediaId, MediaType};
use keeper_vision::MediaPayload;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};

/// Labels forwarded to the bucket-naming call.
const NAMING_LABEL_CAP: usize = 4;

/// An in-memory bucket under construction. The representative is the
/// first member admitted; its payload is cached for future probes.
struct ProtoBucket {
    members: Vec<MediaFile>,
    rep_payload: Option<Arc<MediaPayload>>,
}

impl ProtoBucket {
    fn seed(member: MediaFile, payload: Option<Arc<MediaPayload>>) -> Self {
        Self {
            members: vec![member],
            rep_payload: payload,
        }
    }
}

/// Group the job's media into same-take buckets and persist them.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    if !ctx.records().list_buckets(&ctx.job_id).await?.is_empty() {
        info!("Job {}: buckets already exist, skipping grouping", ctx.job_id);
        return Ok(());
    }

    let files = ctx.records().list_media_files(&ctx.job_id).await?;
    let (images, videos): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|f| f.media_type == MediaType::Image);

    let total = images.len() as u64;
    let mut buckets: Vec<ProtoBucket> = Vec::new();

    for image in images {
        ctx.check_cancelled()?;

        let payload = match ctx.blobs().get_bytes(&image.blob_key).await {
            Ok(bytes) => Some(Arc::new(MediaPayload::new(bytes, image.mime_type.clone()))),
            Err(e) => {
                warn!("Job {}: cannot fetch {} for comparison: {}", ctx.job_id, image.filename, e);
                None
            }
        };

        let chosen = match &payload {
            Some(candidate) => probe_buckets(ctx, candidate, &buckets).await?,
            None => None,
        };

        match chosen {
            Some(index) => buckets[index].members.push(image),
            None => buckets.push(ProtoBucket::seed(image, payload)),
        }

        ctx.bump_progress(JobStatus::Clustering, total).await?;
    }

    if !videos.is_empty() {
        ctx.report_stage(
            JobStatus::Clustering,
            total,
            total,
            Some(format!("grouped {} video clips", videos.len())),
        );
        buckets.push(ProtoBucket {
            members: videos,
            rep_payload: None,
        });
    }

    persist_buckets(ctx, buckets).await
}

/// Race `same_take` probes against every representative; first "same"
/// wins and the rest are abandoned. Probe failures count as "different".
async fn probe_buckets(
    ctx: &JobContext,
    candidate: &Arc<MediaPayload>,
    buckets: &[ProtoBucket],
) -> PipelineResult<Option<usize>> {
    let semaphore = Arc::new(Semaphore::new(ctx.config().compare_concurrency));
    let mut probes: JoinSet<PipelineResult<(usize, bool)>> = JoinSet::new();

    for (index, bucket) in buckets.iter().enumerate() {
        let Some(rep) = bucket.rep_payload.clone() else {
            continue;
        };
        let ctx = ctx.clone();
        let candidate = Arc::clone(candidate);
        let semaphore = Arc::clone(&semaphore);

        probes.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("compare pool closed"))?;
            ctx.check_cancelled()?;

            match ctx.model().same_take(&candidate, &rep).await {
                Ok(same) => Ok((index, same)),
                Err(e) => {
                    warn!("same_take probe failed, treating as different: {}", e);
                    Ok((index, false))
                }
            }
        });
    }

    let mut chosen = None;
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(Ok((index, true))) => {
                chosen = Some(index);
                probes.abort_all();
                break;
            }
            Ok(Ok((_, false))) => {}
            Ok(Err(e)) if e.is_cancellation() => break,
            Ok(Err(e)) => {
                probes.abort_all();
                return Err(e);
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                probes.abort_all();
                return Err(PipelineError::job_failed(join_error.to_string()));
            }
        }
    }

    ctx.check_cancelled()?;
    Ok(chosen)
}

/// Name each bucket, then write buckets and member assignments in one
/// transaction.
async fn persist_buckets(ctx: &JobContext, buckets: Vec<ProtoBucket>) -> PipelineResult<()> {
    let mut rows: Vec<(Bucket, Vec<MediaId>)> = Vec::with_capacity(buckets.len());

    for (index, proto) in buckets.iter().enumerate() {
        ctx.check_cancelled()?;

        let name = name_bucket(ctx, proto, index).await;
        let bucket = Bucket::new(ctx.job_id.clone(), name);
        let members = proto.members.iter().map(|m| m.id.clone()).collect();
        rows.push((bucket, members));
    }

    let member_count: usize = rows.iter().map(|(_, members)| members.len()).sum();
    ctx.records().create_buckets_with_members(&rows).await?;
    info!(
        "Job {}: {} buckets over {} files",
        ctx.job_id,
        rows.len(),
        member_count
    );
    Ok(())
}

async fn name_bucket(ctx: &JobContext, proto: &ProtoBucket, index: usize) -> String {
    let labels: Vec<String> = proto
        .members
        .iter()
        .filter_map(|m| m.label.clone())
        .take(NAMING_LABEL_CAP)
        .collect();

    let fallback = format!("Bucket {}", index + 1);
    if labels.is_empty() {
        return fallback;
    }

    match ctx.model().name_bucket(&labels).await {
        Ok(name) => name,
        Err(e) => {
            warn!("Bucket naming failed, using fallback: {}", e);
            fallback
        }
    }
}
