//! Shared data models for the keeper backend.
//!
//! Everything that crosses a crate boundary lives here: entity records,
//! newtype ids, the job status machine, WebSocket frame types, and the
//! filename filters used during archive expansion.

pub mod bucket;
pub mod job;
pub mod media;
pub mod tournament;
pub mod ws;

pub use bucket::{Bucket, BucketId};
pub use job::{Job, JobId, JobStatus};
pub use media::{
    is_junk_entry, media_type_for_filename, mime_type_for_filename, sanitize_filename, MediaFile,
    MediaId, MediaType, INITIAL_RATING,
};
pub use tournament::TournamentMatch;
pub use ws::{ChunkAck, ClientFrame, ErrorData, ProcessingProgress, ServerFrame, StatusUpdate};
