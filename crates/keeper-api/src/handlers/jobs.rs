//! Job API handlers: summaries, allocation, deletion, and the two result
//! projections.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use keeper_models::{Bucket, Job, JobId, JobStatus, MediaFile, MediaType};
use keeper_storage::{job_prefix, BlobStore};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Query parameters for the summary list.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// `GET /jobs` — paged summaries, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let jobs = state.records.list_jobs(limit, offset).await?;
    let total = state.records.count_jobs().await?;

    Ok(Json(JobListResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub ws_url: String,
}

/// `POST /jobs` — allocate an `uploading` job for a future session.
pub async fn create_job(
    State(state): State<AppState>,
    body: Option<Json<CreateJobRequest>>,
) -> ApiResult<Json<CreateJobResponse>> {
    let name = body.and_then(|Json(request)| request.name);
    let job = Job::new(name);
    state.records.create_job(&job).await?;
    metrics::record_job_created();

    Ok(Json(CreateJobResponse {
        job_id: job.id,
        ws_url: "/ws/upload".to_string(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub media_files: usize,
    pub buckets: usize,
    pub matches: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: Job,
    pub counts: JobCounts,
}

/// `GET /jobs/:id` — summary plus record counts.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDetailResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = require_job(&state, &job_id).await?;

    let media_files = state.records.list_media_files(&job_id).await?.len();
    let buckets = state.records.list_buckets(&job_id).await?.len();
    let matches = state.records.count_matches_for_job(&job_id).await?;

    Ok(Json(JobDetailResponse {
        job,
        counts: JobCounts {
            media_files,
            buckets,
            matches,
        },
    }))
}

#[derive(Serialize)]
pub struct DeleteJobResponse {
    pub deleted: bool,
}

/// `DELETE /jobs/:id` — cascade delete records and blobs.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let job_id = JobId::from_string(job_id);
    require_job(&state, &job_id).await?;

    // Stop any in-flight stage before tearing the artifacts down
    state.orchestrator.cancel(&job_id);

    let removed_blobs = state.storage.delete_prefix(&job_prefix(&job_id)).await?;
    let scratch = state.pipeline_config.scratch_path(&job_id);
    tokio::fs::remove_file(scratch).await.ok();

    let deleted = state.records.delete_job(&job_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("job {job_id} not found")));
    }

    metrics::record_job_deleted();
    info!("Deleted job {} ({} blobs)", job_id, removed_blobs);
    Ok(Json(DeleteJobResponse { deleted: true }))
}

#[derive(Debug, Deserialize)]
pub struct RenameJobRequest {
    pub name: String,
}

/// `PATCH /jobs/:id/name`.
pub async fn rename_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<RenameJobRequest>,
) -> ApiResult<Json<Job>> {
    let job_id = JobId::from_string(job_id);
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    state.records.rename_job(&job_id, name).await.map_err(|e| match e {
        keeper_records::RecordsError::NotFound(msg) => ApiError::not_found(msg),
        other => other.into(),
    })?;

    Ok(Json(require_job(&state, &job_id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketWithMembers {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub members: Vec<MediaFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResultsResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub buckets: Vec<BucketWithMembers>,
    pub unclustered: Vec<MediaFile>,
}

/// `GET /jobs/:id/partial` — progressive results, usable mid-pipeline.
pub async fn partial_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<PartialResultsResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = require_job(&state, &job_id).await?;

    let buckets = load_buckets_with_members(&state, &job_id).await?;
    let unclustered = state.records.unclustered_media_files(&job_id).await?;

    Ok(Json(PartialResultsResponse {
        job_id,
        status: job.status,
        buckets,
        unclustered,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedBucket {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub top_images: Vec<MediaFile>,
    pub top_videos: Vec<MediaFile>,
    pub ranked: Vec<MediaFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResultsResponse {
    pub job_id: JobId,
    pub buckets: Vec<RankedBucket>,
}

/// `GET /jobs/:id/results` — final results; 400 until `completed`.
pub async fn final_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<FinalResultsResponse>> {
    let job_id = JobId::from_string(job_id);
    let job = require_job(&state, &job_id).await?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::bad_request(format!(
            "job is {}, results are available once completed",
            job.status
        )));
    }

    let buckets = load_buckets_with_members(&state, &job_id).await?;
    let buckets = buckets
        .into_iter()
        .map(|entry| {
            let top_images = entry
                .members
                .iter()
                .filter(|m| m.is_top_pick && m.media_type == MediaType::Image)
                .cloned()
                .collect();
            let top_videos = entry
                .members
                .iter()
                .filter(|m| m.is_top_pick && m.media_type == MediaType::Video)
                .cloned()
                .collect();
            RankedBucket {
                bucket: entry.bucket,
                top_images,
                top_videos,
                ranked: entry.members,
            }
        })
        .collect();

    Ok(Json(FinalResultsResponse { job_id, buckets }))
}

async fn require_job(state: &AppState, job_id: &JobId) -> ApiResult<Job> {
    state
        .records
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} not found")))
}

async fn load_buckets_with_members(
    state: &AppState,
    job_id: &JobId,
) -> ApiResult<Vec<BucketWithMembers>> {
    let buckets = state.records.list_buckets(job_id).await?;
    let mut result = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let members = state.records.media_files_in_bucket(&bucket.id).await?;
        result.push(BucketWithMembers { bucket, members });
    }
    Ok(result)
}
