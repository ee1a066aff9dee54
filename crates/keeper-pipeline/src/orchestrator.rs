//! The job state machine.
//!
//! The orchestrator reads `Job.status`, runs the matching stage, and on
//! success atomically advances the status and resets the progress
//! counter. Failures persist a single user-visible message; cancellation
//! leaves the job in its current non-terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use keeper_models::{JobId, JobStatus};

use crate::archive;
use crate::context::{JobContext, PipelineServices};
use crate::error::{PipelineError, PipelineResult};
use crate::stages;

/// Orchestrates jobs over a bounded pool of worker tasks.
pub struct Orchestrator {
    services: Arc<PipelineServices>,
    queue: mpsc::UnboundedSender<JobId>,
    cancellations: Mutex<HashMap<JobId, CancellationToken>>,
}

impl Orchestrator {
    /// Construct the orchestrator and spawn its dispatch loop.
    pub fn start(services: Arc<PipelineServices>) -> Arc<Self> {
        let (queue, mut receiver) = mpsc::unbounded_channel::<JobId>();
        let orchestrator = Arc::new(Self {
            services,
            queue,
            cancellations: Mutex::new(HashMap::new()),
        });

        let dispatcher = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let pool = Arc::new(Semaphore::new(
                dispatcher.services.config.max_concurrent_jobs,
            ));
            while let Some(job_id) = receiver.recv().await {
                let permit = match Arc::clone(&pool).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.process_job(job_id).await;
                });
            }
        });

        orchestrator
    }

    /// Queue a job for processing.
    pub fn enqueue(&self, job_id: JobId) {
        if self.queue.send(job_id.clone()).is_err() {
            error!("Orchestrator queue closed, dropping job {}", job_id);
        }
    }

    /// Cancellation token for a job, created on first use.
    pub fn cancellation_for(&self, job_id: &JobId) -> CancellationToken {
        self.cancellations
            .lock()
            .expect("cancellation lock poisoned")
            .entry(job_id.clone())
            .or_default()
            .clone()
    }

    /// Cancel one job. Workers stop at their next suspension point; the
    /// job keeps its current status.
    pub fn cancel(&self, job_id: &JobId) {
        if let Some(token) = self
            .cancellations
            .lock()
            .expect("cancellation lock poisoned")
            .get(job_id)
        {
            token.cancel();
        }
    }

    /// Cancel every running job (process shutdown).
    pub fn cancel_all(&self) {
        for token in self
            .cancellations
            .lock()
            .expect("cancellation lock poisoned")
            .values()
        {
            token.cancel();
        }
    }

    /// Run a job through its remaining stages. Used by the dispatch loop;
    /// also awaitable directly.
    pub async fn process_job(&self, job_id: JobId) {
        let token = self.cancellation_for(&job_id);
        let ctx = JobContext::new(job_id.clone(), token, Arc::clone(&self.services));
        let span = info_span!("job", job_id = %job_id);

        let outcome = self.run_stages(&ctx).instrument(span).await;
        match outcome {
            Ok(()) => {
                counter!("keeper_jobs_completed_total").increment(1);
            }
            Err(e) if e.is_cancellation() => {
                counter!("keeper_jobs_cancelled_total").increment(1);
                info!("Job {} cancelled, leaving status in place", job_id);
            }
            Err(e) => {
                counter!("keeper_jobs_failed_total").increment(1);
                error!("Job {} failed: {}", job_id, e);
                if let Err(persist) = self.services.records.fail_job(&job_id, e.to_string()).await
                {
                    error!("Could not persist failure for {}: {}", job_id, persist);
                }
                if let Ok(job) = self.services.records.require_job(&job_id).await {
                    self.services.progress.status(
                        &job_id,
                        JobStatus::Failed,
                        job.processed_files,
                        job.total_files,
                    );
                }
            }
        }

        self.cancellations
            .lock()
            .expect("cancellation lock poisoned")
            .remove(&job_id);
        self.services.progress.remove(&job_id);
    }

    async fn run_stages(&self, ctx: &JobContext) -> PipelineResult<()> {
        loop {
            ctx.check_cancelled()?;
            let job = ctx.records().require_job(&ctx.job_id).await?;

            let next = match job.status {
                JobStatus::Uploading => {
                    return Err(PipelineError::job_failed("upload interrupted by restart"));
                }
                JobStatus::Extracting => {
                    archive::run(ctx).await?;
                    JobStatus::Labeling
                }
                JobStatus::Labeling => {
                    stages::label::run(ctx).await?;
                    JobStatus::Clustering
                }
                JobStatus::Clustering => {
                    stages::cluster::run(ctx).await?;
                    JobStatus::Merging
                }
                JobStatus::Merging => {
                    stages::merge::run(ctx).await?;
                    JobStatus::Ranking
                }
                JobStatus::Ranking => {
                    stages::rank::run(ctx).await?;
                    JobStatus::Enhancing
                }
                JobStatus::Enhancing => {
                    stages::enhance::run(ctx).await?;
                    JobStatus::Completed
                }
                JobStatus::Completed | JobStatus::Failed => return Ok(()),
            };

            ctx.records().advance_job_status(&ctx.job_id, next).await?;
            let refreshed = ctx.records().require_job(&ctx.job_id).await?;
            ctx.progress()
                .status(&ctx.job_id, next, 0, refreshed.total_files);
            info!("Job {} advanced to {}", ctx.job_id, next);
        }
    }
}

/// Boot-time recovery: re-enqueue every non-terminal job. Jobs still in
/// `uploading` lost their byte stream with the old process and are marked
/// failed instead.
pub async fn recover_jobs(orchestrator: &Orchestrator) -> PipelineResult<usize> {
    let services = &orchestrator.services;
    let jobs = services.records.recoverable_jobs().await?;
    let mut enqueued = 0;

    for job in jobs {
        if job.status == JobStatus::Uploading {
            warn!("Job {} was mid-upload at shutdown, marking failed", job.id);
            services
                .records
                .fail_job(&job.id, "upload interrupted by restart")
                .await?;
            let scratch = services.config.scratch_path(&job.id);
            tokio::fs::remove_file(scratch).await.ok();
            continue;
        }

        info!("Recovering job {} at {}", job.id, job.status);
        orchestrator.enqueue(job.id.clone());
        enqueued += 1;
    }

    Ok(enqueued)
}
