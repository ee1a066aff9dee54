//! Upload session frame types.
//!
//! The duplex upload protocol speaks JSON text frames in both directions
//! plus client binary frames carrying a 4-byte big-endian chunk index and
//! the chunk bytes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// Text frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the session and announces the archive dimensions.
    Init {
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        #[serde(rename = "totalSize")]
        total_size: u64,
        /// Adopt a job pre-allocated via `POST /jobs` instead of creating one.
        #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        /// Optional display name for a session-created job.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// Payload of a `status_update` frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(rename = "processedFiles")]
    pub processed_files: i64,
    #[serde(rename = "totalFiles")]
    pub total_files: i64,
}

/// Payload of a `chunk_ack` frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkAck {
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    pub received: u32,
    pub total: u32,
}

/// Payload of a `processing_progress` frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingProgress {
    pub stage: String,
    pub current: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Text frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Job status changed (also the reply to `init`, carrying the job id).
    StatusUpdate {
        #[serde(rename = "jobId")]
        job_id: JobId,
        data: StatusUpdate,
    },

    /// One chunk was appended to the scratch archive.
    ChunkAck {
        #[serde(rename = "jobId")]
        job_id: JobId,
        data: ChunkAck,
    },

    /// A pipeline stage reported progress.
    ProcessingProgress {
        #[serde(rename = "jobId")]
        job_id: JobId,
        data: ProcessingProgress,
    },

    /// Session-level failure.
    Error { data: ErrorData },
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorData {
    pub message: String,
}

impl ServerFrame {
    /// Create a status update frame.
    pub fn status_update(job_id: JobId, status: JobStatus, processed: i64, total: i64) -> Self {
        ServerFrame::StatusUpdate {
            job_id,
            data: StatusUpdate {
                status,
                processed_files: processed,
                total_files: total,
            },
        }
    }

    /// Create a chunk acknowledgement frame.
    pub fn chunk_ack(job_id: JobId, chunk_index: u32, received: u32, total: u32) -> Self {
        ServerFrame::ChunkAck {
            job_id,
            data: ChunkAck {
                chunk_index,
                received,
                total,
            },
        }
    }

    /// Create a processing progress frame.
    pub fn processing_progress(
        job_id: JobId,
        stage: impl Into<String>,
        current: u64,
        total: u64,
        message: Option<String>,
    ) -> Self {
        ServerFrame::ProcessingProgress {
            job_id,
            data: ProcessingProgress {
                stage: stage.into(),
                current,
                total,
                message,
            },
        }
    }

    /// Create an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            data: ErrorData {
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_frame_deserialization() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"kind":"init","totalChunks":12,"totalSize":9000000}"#)
                .unwrap();
        let ClientFrame::Init {
            total_chunks,
            total_size,
            job_id,
            name,
        } = frame;
        assert_eq!(total_chunks, 12);
        assert_eq!(total_size, 9_000_000);
        assert!(job_id.is_none());
        assert!(name.is_none());
    }

    #[test]
    fn test_status_update_serialization() {
        let frame = ServerFrame::status_update("job-1".into(), JobStatus::Labeling, 3, 10);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"status_update""#));
        assert!(json.contains(r#""jobId":"job-1""#));
        assert!(json.contains(r#""status":"labeling""#));
        assert!(json.contains(r#""processedFiles":3"#));
        assert!(json.contains(r#""totalFiles":10"#));
    }

    #[test]
    fn test_chunk_ack_serialization() {
        let frame = ServerFrame::chunk_ack("job-1".into(), 4, 5, 12);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"chunk_ack""#));
        assert!(json.contains(r#""chunkIndex":4"#));
        assert!(json.contains(r#""received":5"#));
        assert!(json.contains(r#""total":12"#));
    }

    #[test]
    fn test_progress_omits_empty_message() {
        let frame =
            ServerFrame::processing_progress("job-1".into(), "ranking", 3, 15, None);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"processing_progress""#));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_error_has_no_job_id() {
        let frame = ServerFrame::error("no active upload session");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"error","data":{"message":"no active upload session"}}"#
        );
    }
}
