//! User-owned configuration. Loaded from `.sproutline/config.json` when
//! present; every section falls back to defaults field by field.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::ErrorPolicy;

const DEFAULT_CONFIG_PATH: &str = ".sproutline/config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

impl OrchestratorConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_at(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_at(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub error_policy: ErrorPolicy,
    pub stage_timeout_seconds: u64,
    pub simulation_step_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::ContinueOnError,
            stage_timeout_seconds: 30,
            simulation_step_ms: 150,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    pub fn simulation_step(&self) -> Duration {
        Duration::from_millis(self.simulation_step_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: ".sproutline/cases".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = OrchestratorConfig::load_at(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.pipeline.stage_timeout_seconds, 30);
        assert_eq!(config.pipeline.error_policy, ErrorPolicy::ContinueOnError);
        assert_eq!(config.storage.dir, ".sproutline/cases");
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"pipeline": {"error_policy": "abort_on_error", "stage_timeout_seconds": 5}}"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load_at(&path).unwrap();
        assert_eq!(config.pipeline.error_policy, ErrorPolicy::AbortOnError);
        assert_eq!(config.pipeline.stage_timeout_seconds, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.pipeline.simulation_step_ms, 150);
        assert_eq!(config.api.timeout_seconds, 120);
    }

    #[test]
    fn duration_helpers() {
        let config = PipelineConfig::default();
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.simulation_step(), Duration::from_millis(150));
    }
}
