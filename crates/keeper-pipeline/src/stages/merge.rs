//! Clustering stage, Phase B: representative merge sweep.
//!
//! Every pair of image-bucket representatives is compared once; "same"
//! verdicts drive a union-find, and each connected component collapses
//! into its lowest-indexed bucket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use keeper_models::{Bucket, BucketId, JobStatus, MediaFile, MediaId, MediaType};
use keeper_vision::MediaPayload;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};
use crate::union_find::UnionFind;

/// Merge buckets whose representatives are the same take.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    let buckets = ctx.records().list_buckets(&ctx.job_id).await?;
    let files = ctx.records().list_media_files(&ctx.job_id).await?;

    let mut members_by_bucket: HashMap<BucketId, Vec<MediaFile>> = HashMap::new();
    for file in files {
        if let Some(bucket_id) = &file.bucket_id {
            members_by_bucket
                .entry(bucket_id.clone())
                .or_default()
                .push(file);
        }
    }

    // Buckets holding images, in creation order; the video bucket never
    // participates in the sweep.
    let image_buckets: Vec<Bucket> = buckets
        .into_iter()
        .filter(|b| {
            members_by_bucket
                .get(&b.id)
                .is_some_and(|members| members.iter().all(|m| m.media_type == MediaType::Image))
        })
        .collect();

    if image_buckets.len() < 2 {
        return Ok(());
    }

    let representatives = fetch_representatives(ctx, &image_buckets, &members_by_bucket).await?;
    let pairs: Vec<(usize, usize)> = (0..image_buckets.len())
        .flat_map(|i| (i + 1..image_buckets.len()).map(move |j| (i, j)))
        .collect();
    let total_pairs = pairs.len() as u64;

    let semaphore = Arc::new(Semaphore::new(ctx.config().merge_concurrency));
    let completed = Arc::new(AtomicU64::new(0));
    let mut probes: JoinSet<PipelineResult<Option<(usize, usize)>>> = JoinSet::new();

    for (i, j) in pairs {
        let (Some(rep_i), Some(rep_j)) = (representatives[i].clone(), representatives[j].clone())
        else {
            continue;
        };
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);
        let completed = Arc::clone(&completed);

        probes.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("merge pool closed"))?;
            ctx.check_cancelled()?;

            let same = match ctx.model().same_take(&rep_i, &rep_j).await {
                Ok(same) => same,
                Err(e) => {
                    warn!("merge probe failed, keeping buckets apart: {}", e);
                    false
                }
            };

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.report_stage(JobStatus::Merging, done, total_pairs, None);
            Ok(same.then_some((i, j)))
        });
    }

    let mut union_find = UnionFind::new(image_buckets.len());
    let mut failure: Option<PipelineError> = None;
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(Ok(Some((i, j)))) => {
                union_find.union(i, j);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                if failure.is_none() && !e.is_cancellation() {
                    failure = Some(e);
                    probes.abort_all();
                }
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                if failure.is_none() {
                    failure = Some(PipelineError::job_failed(join_error.to_string()));
                    probes.abort_all();
                }
            }
        }
    }
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    if let Some(e) = failure {
        return Err(e);
    }

    collapse_components(ctx, &image_buckets, &members_by_bucket, union_find).await
}

/// Representative payload per image bucket (first member admitted).
/// A fetch failure leaves the bucket out of the sweep.
async fn fetch_representatives(
    ctx: &JobContext,
    image_buckets: &[Bucket],
    members_by_bucket: &HashMap<BucketId, Vec<MediaFile>>,
) -> PipelineResult<Vec<Option<Arc<MediaPayload>>>> {
    let mut representatives = Vec::with_capacity(image_buckets.len());

    for bucket in image_buckets {
        ctx.check_cancelled()?;
        let Some(rep) = members_by_bucket.get(&bucket.id).and_then(|m| m.first()) else {
            representatives.push(None);
            continue;
        };

        match ctx.blobs().get_bytes(&rep.blob_key).await {
            Ok(bytes) => representatives.push(Some(Arc::new(MediaPayload::new(
                bytes,
                rep.mime_type.clone(),
            )))),
            Err(e) => {
                warn!("Cannot fetch representative {}: {}", rep.filename, e);
                representatives.push(None);
            }
        }
    }

    Ok(representatives)
}

/// Move members of every component into its lowest-indexed bucket and
/// delete the absorbed bucket rows.
async fn collapse_components(
    ctx: &JobContext,
    image_buckets: &[Bucket],
    members_by_bucket: &HashMap<BucketId, Vec<MediaFile>>,
    mut union_find: UnionFind,
) -> PipelineResult<()> {
    let mut moves: Vec<(MediaId, BucketId)> = Vec::new();
    let mut absorbed: Vec<BucketId> = Vec::new();

    for component in union_find.components() {
        if component.len() < 2 {
            continue;
        }
        let target = image_buckets[component[0]].id.clone();
        for &index in &component[1..] {
            let source = &image_buckets[index];
            if let Some(members) = members_by_bucket.get(&source.id) {
                moves.extend(members.iter().map(|m| (m.id.clone(), target.clone())));
            }
            absorbed.push(source.id.clone());
        }
    }

    if absorbed.is_empty() {
        return Ok(());
    }

    ctx.records().merge_buckets(&moves, &absorbed).await?;

    info!(
        "Job {}: merge collapsed {} buckets into existing ones",
        ctx.job_id,
        absorbed.len()
    );
    Ok(())
}
