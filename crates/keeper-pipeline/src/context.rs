//! Explicit per-job context threaded through every stage.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use keeper_models::{JobId, JobStatus};
use keeper_records::RecordStore;
use keeper_storage::BlobStore;
use keeper_vision::ModelAdapter;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressChannel;

/// Process-wide services, constructed once at boot and shared by every job.
pub struct PipelineServices {
    pub records: RecordStore,
    pub blobs: Arc<dyn BlobStore>,
    pub model: Arc<dyn ModelAdapter>,
    pub progress: Arc<ProgressChannel>,
    pub config: PipelineConfig,
}

impl PipelineServices {
    pub fn new(
        records: RecordStore,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn ModelAdapter>,
        progress: Arc<ProgressChannel>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            records,
            blobs,
            model,
            progress,
            config,
        }
    }
}

/// Everything a stage worker needs: the job id, the cancellation token,
/// and handles to the shared services. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub cancel: CancellationToken,
    services: Arc<PipelineServices>,
}

impl JobContext {
    pub fn new(job_id: JobId, cancel: CancellationToken, services: Arc<PipelineServices>) -> Self {
        Self {
            job_id,
            cancel,
            services,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.services.records
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.services.blobs.as_ref()
    }

    pub fn model(&self) -> &dyn ModelAdapter {
        self.services.model.as_ref()
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.services.progress
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.services.config
    }

    /// Bail out if the job was cancelled. Called at suspension points.
    pub fn check_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Publish stage progress without touching the persisted counter.
    pub fn report_stage(&self, stage: JobStatus, current: u64, total: u64, message: Option<String>) {
        self.progress()
            .stage(&self.job_id, stage, current, total, message);
    }

    /// Bump the persisted progress counter and publish the new value.
    pub async fn bump_progress(&self, stage: JobStatus, total: u64) -> PipelineResult<()> {
        let processed = self.records().increment_job_progress(&self.job_id).await?;
        self.report_stage(stage, processed.max(0) as u64, total, None);
        Ok(())
    }
}
