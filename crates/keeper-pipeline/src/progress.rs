//! In-process progress events.
//!
//! The orchestrator is the sole writer per job, so events for one job are
//! totally ordered. Subscribers (the upload session, tests) receive a
//! broadcast stream; publishing without subscribers is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use keeper_models::{JobId, JobStatus};

const CHANNEL_CAPACITY: usize = 256;

/// One progress event for a job.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The job moved to a new status.
    Status {
        status: JobStatus,
        processed: i64,
        total: i64,
    },

    /// A stage finished one unit of work.
    Stage {
        stage: JobStatus,
        current: u64,
        total: u64,
        message: Option<String>,
    },
}

/// Per-job broadcast channels.
#[derive(Default)]
pub struct ProgressChannel {
    senders: Mutex<HashMap<JobId, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, job_id: &JobId) -> broadcast::Sender<ProgressEvent> {
        let mut senders = self.senders.lock().expect("progress lock poisoned");
        senders
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a job's events.
    pub fn subscribe(&self, job_id: &JobId) -> broadcast::Receiver<ProgressEvent> {
        self.sender(job_id).subscribe()
    }

    /// Publish an event; lagging or absent subscribers are ignored.
    pub fn publish(&self, job_id: &JobId, event: ProgressEvent) {
        let sender = self.sender(job_id);
        if sender.send(event).is_err() {
            debug!("No subscribers for job {}", job_id);
        }
    }

    /// Publish a status change.
    pub fn status(&self, job_id: &JobId, status: JobStatus, processed: i64, total: i64) {
        self.publish(
            job_id,
            ProgressEvent::Status {
                status,
                processed,
                total,
            },
        );
    }

    /// Publish stage progress.
    pub fn stage(
        &self,
        job_id: &JobId,
        stage: JobStatus,
        current: u64,
        total: u64,
        message: Option<String>,
    ) {
        self.publish(
            job_id,
            ProgressEvent::Stage {
                stage,
                current,
                total,
                message,
            },
        );
    }

    /// Drop a finished job's channel.
    pub fn remove(&self, job_id: &JobId) {
        self.senders
            .lock()
            .expect("progress lock poisoned")
            .remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let channel = ProgressChannel::new();
        let job_id = JobId::new();
        let mut rx = channel.subscribe(&job_id);

        channel.stage(&job_id, JobStatus::Labeling, 1, 10, None);

        match rx.recv().await.unwrap() {
            ProgressEvent::Stage { stage, current, total, .. } => {
                assert_eq!(stage, JobStatus::Labeling);
                assert_eq!(current, 1);
                assert_eq!(total, 10);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let channel = ProgressChannel::new();
        let job_id = JobId::new();
        channel.status(&job_id, JobStatus::Completed, 0, 0);
    }

    #[tokio::test]
    async fn test_events_are_per_job() {
        let channel = ProgressChannel::new();
        let a = JobId::new();
        let b = JobId::new();
        let mut rx_a = channel.subscribe(&a);

        channel.stage(&b, JobStatus::Ranking, 1, 1, None);
        channel.stage(&a, JobStatus::Labeling, 2, 3, None);

        match rx_a.recv().await.unwrap() {
            ProgressEvent::Stage { stage, .. } => assert_eq!(stage, JobStatus::Labeling),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
