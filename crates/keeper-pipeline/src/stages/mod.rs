//! Stage workers scheduled by the orchestrator.

pub mod cluster;
pub mod enhance;
pub mod label;
pub mod merge;
pub mod rank;

use tokio::task::JoinSet;

use crate::context::JobContext;
use crate::error::{PipelineError, PipelineResult};

/// Await a fan-out to completion. Returns `Cancelled` when the job's token
/// fired, otherwise the first worker error, otherwise `Ok`.
pub(crate) async fn drain_workers<T: 'static>(
    ctx: &JobContext,
    mut tasks: JoinSet<PipelineResult<T>>,
) -> PipelineResult<()> {
    let mut failure: Option<PipelineError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                if failure.is_none() && !e.is_cancellation() {
                    failure = Some(e);
                    tasks.abort_all();
                }
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                if failure.is_none() {
                    failure = Some(PipelineError::job_failed(join_error.to_string()));
                    tasks.abort_all();
                }
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
