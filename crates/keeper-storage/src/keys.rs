//! Blob key layout.
//!
//! Originals live at `jobs/{jobId}/original/{filename}`, enhanced
//! renderings at `jobs/{jobId}/enhanced/enhanced_{filename}`. Deleting a
//! job deletes everything under `jobs/{jobId}/`.

use keeper_models::JobId;

/// Key of an original media file.
pub fn original_key(job_id: &JobId, filename: &str) -> String {
    format!("jobs/{job_id}/original/{filename}")
}

/// Key of an enhanced rendering.
pub fn enhanced_key(job_id: &JobId, filename: &str) -> String {
    format!("jobs/{job_id}/enhanced/enhanced_{filename}")
}

/// Prefix covering every blob the job owns.
pub fn job_prefix(job_id: &JobId) -> String {
    format!("jobs/{job_id}/")
}
