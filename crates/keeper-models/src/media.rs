//! Media file entity and the archive-entry filters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{BucketId, JobId};

/// Unique identifier for an ingested media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Generate a new random media ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MediaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of media carried by a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// One ingested photo or video clip.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    /// Unique media ID
    pub id: MediaId,

    /// Owning job
    pub job_id: JobId,

    /// Sanitized filename used in blob keys
    pub filename: String,

    /// Path of the entry inside the uploaded archive
    pub original_path: String,

    /// Blob key of the original bytes
    pub blob_key: String,

    /// Resolved URL for the original bytes
    pub blob_url: String,

    /// Image or video
    pub media_type: MediaType,

    /// Resolved MIME type
    pub mime_type: String,

    /// Size of the original bytes
    pub size_bytes: i64,

    /// Short description produced by the labeler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Elo rating from the ranking stage
    pub rating_score: f64,

    /// Marked among the top three of its bucket
    pub is_top_pick: bool,

    /// Blob key of the enhanced rendering, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_blob_key: Option<String>,

    /// Resolved URL for the enhanced rendering, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_blob_url: Option<String>,

    /// Same-take bucket, once clustered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<BucketId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Initial Elo rating for every media file.
pub const INITIAL_RATING: f64 = 1000.0;

impl MediaFile {
    /// Create a new record for an archive entry that was just uploaded.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        filename: impl Into<String>,
        original_path: impl Into<String>,
        blob_key: impl Into<String>,
        blob_url: impl Into<String>,
        media_type: MediaType,
        mime_type: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        Self {
            id: MediaId::new(),
            job_id,
            filename: filename.into(),
            original_path: original_path.into(),
            blob_key: blob_key.into(),
            blob_url: blob_url.into(),
            media_type,
            mime_type: mime_type.into(),
            size_bytes,
            label: None,
            rating_score: INITIAL_RATING,
            is_top_pick: false,
            enhanced_blob_key: None,
            enhanced_blob_url: None,
            bucket_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Accepted image extensions (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp", "tiff",
];

/// Accepted video extensions (lowercase).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

fn extension_of(filename: &str) -> Option<String> {
    let basename = filename.rsplit('/').next().unwrap_or(filename);
    let (_, ext) = basename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Classify an archive entry by extension; `None` means unsupported.
pub fn media_type_for_filename(filename: &str) -> Option<MediaType> {
    let ext = extension_of(filename)?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Resolve a MIME type from the filename extension.
pub fn mime_type_for_filename(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("bmp") => "image/bmp",
        Some("tiff") => "image/tiff",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        _ => "application/octet-stream",
    }
}

/// Whether an archive entry is filesystem noise rather than media:
/// hidden files, AppleDouble resource forks, `__MACOSX` payloads, and
/// Windows thumbnail caches.
pub fn is_junk_entry(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    basename.is_empty()
        || basename.starts_with('.')
        || basename.starts_with("._")
        || basename.eq_ignore_ascii_case("Thumbs.db")
        || path.split('/').any(|part| part == "__MACOSX")
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_` so the name is
/// safe inside a blob key.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
