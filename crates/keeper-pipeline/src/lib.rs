//! The keeper processing pipeline.
//!
//! Owns the job state machine: archive expansion, labeling, same-take
//! clustering and merging, Elo tournaments, and top-pick enhancement,
//! with bounded concurrency per stage and cancellation observed at every
//! suspension point.

pub mod archive;
pub mod config;
pub mod context;
pub mod elo;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod stages;
pub mod union_find;

pub use config::PipelineConfig;
pub use context::{JobContext, PipelineServices};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{recover_jobs, Orchestrator};
pub use progress::{ProgressChannel, ProgressEvent};
