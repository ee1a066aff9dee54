//! Application state.

use std::sync::Arc;

use keeper_pipeline::{Orchestrator, PipelineConfig, PipelineServices, ProgressChannel};
use keeper_records::RecordStore;
use keeper_storage::{BlobClient, BlobStore};
use keeper_vision::GeminiClient;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub records: RecordStore,
    pub storage: Arc<BlobClient>,
    pub progress: Arc<ProgressChannel>,
    pub orchestrator: Arc<Orchestrator>,
    pub pipeline_config: PipelineConfig,
}

impl AppState {
    /// Create new application state; constructs every adapter once.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let records = RecordStore::from_env().await?;
        let storage = Arc::new(BlobClient::from_env()?);
        let model = Arc::new(GeminiClient::from_env()?);
        let progress = Arc::new(ProgressChannel::new());
        let pipeline_config = PipelineConfig::from_env();

        tokio::fs::create_dir_all(&pipeline_config.scratch_dir).await?;

        let services = Arc::new(PipelineServices::new(
            records.clone(),
            Arc::clone(&storage) as Arc<dyn BlobStore>,
            model,
            Arc::clone(&progress),
            pipeline_config.clone(),
        ));
        let orchestrator = Orchestrator::start(services);

        Ok(Self {
            config,
            records,
            storage,
            progress,
            orchestrator,
            pipeline_config,
        })
    }
}
