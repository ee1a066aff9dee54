//! Pipeline configuration.

use std::path::PathBuf;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

/// Concurrency bounds and scratch location for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Jobs processed in parallel by the orchestrator
    pub max_concurrent_jobs: usize,
    /// `describe` calls per job
    pub label_concurrency: usize,
    /// `same_take` probes racing for one new image (Phase A)
    pub compare_concurrency: usize,
    /// Representative comparisons during the merge sweep (Phase B)
    pub merge_concurrency: usize,
    /// Quality matches inside one bucket tournament
    pub match_concurrency: usize,
    /// Bucket tournaments running in parallel
    pub tournament_concurrency: usize,
    /// Enhancement calls per job
    pub enhance_concurrency: usize,
    /// Directory holding scratch archives during upload
    pub scratch_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            label_concurrency: 10,
            compare_concurrency: 20,
            merge_concurrency: 40,
            match_concurrency: 8,
            tournament_concurrency: 3,
            enhance_concurrency: 3,
            scratch_dir: std::env::temp_dir().join("keeper-uploads"),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_usize("KEEPER_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs),
            label_concurrency: env_usize("KEEPER_LABEL_CONCURRENCY", defaults.label_concurrency),
            compare_concurrency: env_usize("KEEPER_COMPARE_CONCURRENCY", defaults.compare_concurrency),
            merge_concurrency: env_usize("KEEPER_MERGE_CONCURRENCY", defaults.merge_concurrency),
            match_concurrency: env_usize("KEEPER_MATCH_CONCURRENCY", defaults.match_concurrency),
            tournament_concurrency: env_usize(
                "KEEPER_TOURNAMENT_CONCURRENCY",
                defaults.tournament_concurrency,
            ),
            enhance_concurrency: env_usize("KEEPER_ENHANCE_CONCURRENCY", defaults.enhance_concurrency),
            scratch_dir: std::env::var("KEEPER_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
        }
    }

    /// Path of the scratch archive owned by one upload session.
    pub fn scratch_path(&self, job_id: &keeper_models::JobId) -> PathBuf {
        self.scratch_dir.join(format!("{job_id}.zip"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_models::JobId;

    #[test]
    fn test_default_pool_bounds() {
        let config = PipelineConfig::default();
        assert_eq!(config.label_concurrency, 10);
        assert_eq!(config.compare_concurrency, 20);
        assert_eq!(config.merge_concurrency, 40);
        assert_eq!(config.match_concurrency, 8);
        assert_eq!(config.tournament_concurrency, 3);
        assert_eq!(config.enhance_concurrency, 3);
    }

    #[test]
    fn test_scratch_path_is_per_job() {
        let config = PipelineConfig::default();
        let a = config.scratch_path(&JobId::from_string("a"));
        let b = config.scratch_path(&JobId::from_string("b"));
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("a.zip"));
    }
}
