//! Multimodal model adapter for the keeper pipeline.
//!
//! Exposes the [`ModelAdapter`] trait (describe / same-take / compare /
//! enhance / name-bucket) and the Gemini-backed production client with
//! per-call timeouts and exponential-backoff retries.

pub mod adapter;
pub mod error;
pub mod gemini;
pub mod prompts;
pub mod retry;
pub mod types;

pub use adapter::ModelAdapter;
pub use error::{ModelError, ModelResult};
pub use gemini::{GeminiClient, GeminiConfig};
pub use retry::{retry_model_call, RetryConfig};
pub use types::{BucketNameSuggestion, MediaPayload, QualityVerdict, SameTakeVerdict};
