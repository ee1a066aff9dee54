//! Transactional record store for the keeper backend.
//!
//! One [`RecordStore`] handle backed by sqlx/SQLite; typed repository
//! methods live in per-entity modules.

pub mod bucket_repo;
pub mod error;
pub mod job_repo;
pub mod match_repo;
pub mod media_repo;
pub mod store;

pub use error::{RecordsError, RecordsResult};
pub use store::RecordStore;
